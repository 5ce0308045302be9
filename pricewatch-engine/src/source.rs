//! Work item sources

use anyhow::Context;
use async_trait::async_trait;
use pricewatch_core::domain::item::WorkItem;
use std::path::PathBuf;

/// Produces the work items of a job
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<WorkItem>>;
}

/// Items known up front, e.g. from a submission request
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    items: Vec<WorkItem>,
}

impl StaticSource {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self { items }
    }
}

#[async_trait]
impl WorkItemSource for StaticSource {
    async fn load(&self) -> anyhow::Result<Vec<WorkItem>> {
        Ok(self.items.clone())
    }
}

/// Items read from a JSON array on disk
#[derive(Debug, Clone)]
pub struct JsonFileSource {
    path: PathBuf,
}

impl JsonFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl WorkItemSource for JsonFileSource {
    async fn load(&self) -> anyhow::Result<Vec<WorkItem>> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read work items from {}", self.path.display()))?;

        let items: Vec<WorkItem> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid work item file {}", self.path.display()))?;

        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_json_file_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[
                {{"id": "1", "name": "Kettle", "primary_url": "https://with.gsshop.com/prd/1",
                  "competitors": [{{"label": "cj", "url": "https://display.cjonstyle.com/p/9"}}]}},
                {{"id": "2", "name": "Toaster", "primary_url": null}}
            ]"#
        )
        .unwrap();

        let items = JsonFileSource::new(file.path()).load().await.unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].competitors[0].label, "cj");
        assert!(items[1].competitors.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_has_context() {
        let err = JsonFileSource::new("/nonexistent/items.json")
            .load()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("/nonexistent/items.json"));
    }

    #[tokio::test]
    async fn test_static_source_returns_items() {
        let items = vec![WorkItem {
            id: "a".to_string(),
            name: "A".to_string(),
            primary_url: None,
            competitors: Vec::new(),
        }];
        assert_eq!(StaticSource::new(items.clone()).load().await.unwrap(), items);
    }
}
