//! OS process control for browser and driver processes
//!
//! Browsers spawn renderer and helper children that outlive a crashed driver.
//! Cleanup walks the process tree with `pgrep` and force-kills every member.
//! All failures are ignored: a process that is already gone is the normal case.

use tokio::process::Command;
use tracing::debug;

/// Collects `pid` and all of its descendants, parents first
pub async fn process_tree(pid: u32) -> Vec<u32> {
    let mut tree = vec![pid];
    let mut cursor = 0;

    while cursor < tree.len() {
        let parent = tree[cursor];
        cursor += 1;

        let output = Command::new("pgrep")
            .arg("-P")
            .arg(parent.to_string())
            .output()
            .await;

        let Ok(output) = output else {
            continue;
        };

        for child in parse_pids(&String::from_utf8_lossy(&output.stdout)) {
            if !tree.contains(&child) {
                tree.push(child);
            }
        }
    }

    tree
}

/// Collects every process in the trees rooted at `roots`, parents first
pub async fn process_trees(roots: &[u32]) -> Vec<u32> {
    let mut all = Vec::new();
    for &root in roots {
        for pid in process_tree(root).await {
            if !all.contains(&pid) {
                all.push(pid);
            }
        }
    }
    all
}

/// Force-kills exactly `pids`, last first
///
/// Takes a snapshot rather than walking the tree again: once a parent dies
/// its children are reparented and can no longer be found through it.
pub async fn kill_pids(pids: &[u32]) {
    // Children first so the parent cannot respawn them
    for &pid in pids.iter().rev() {
        let result = Command::new("kill")
            .arg("-KILL")
            .arg(pid.to_string())
            .output()
            .await;

        match result {
            Ok(output) if output.status.success() => {
                debug!("Killed process {}", pid);
            }
            Ok(_) => {
                debug!("Process {} already gone", pid);
            }
            Err(e) => {
                debug!("Failed to run kill for process {}: {}", pid, e);
            }
        }
    }
}

/// Blocking variant of [`kill_pids`] for callers outside a runtime
pub fn kill_pids_blocking(pids: &[u32]) {
    for &pid in pids.iter().rev() {
        let result = std::process::Command::new("kill")
            .arg("-KILL")
            .arg(pid.to_string())
            .output();

        match result {
            Ok(output) if output.status.success() => debug!("Killed process {}", pid),
            Ok(_) => debug!("Process {} already gone", pid),
            Err(e) => debug!("Failed to run kill for process {}: {}", pid, e),
        }
    }
}

/// Whether `pid` is a running process; zombies count as gone
pub fn is_running(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{}/stat", pid)) else {
        return false;
    };
    // The state follows the parenthesized command name
    match stat.rfind(')').and_then(|i| stat[i + 1..].split_whitespace().next()) {
        Some(state) => state != "Z" && state != "X",
        None => false,
    }
}

fn parse_pids(text: &str) -> Vec<u32> {
    text.split_whitespace()
        .filter_map(|s| s.parse::<u32>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pids() {
        assert_eq!(parse_pids("123\n456\n"), vec![123, 456]);
        assert_eq!(parse_pids(""), Vec::<u32>::new());
        assert_eq!(parse_pids("12 x 7"), vec![12, 7]);
    }

    #[test]
    fn test_is_running() {
        assert!(is_running(std::process::id()));
        assert!(!is_running(4_194_305));
    }

    #[tokio::test]
    async fn test_kill_ignores_missing_processes() {
        // PIDs above pid_max never exist
        kill_pids(&process_trees(&[4_194_305, 4_194_306]).await).await;
    }

    #[tokio::test]
    async fn test_kill_terminates_child() {
        if Command::new("kill").arg("-l").output().await.is_err() {
            return;
        }
        let mut child = match Command::new("sleep").arg("30").spawn() {
            Ok(child) => child,
            Err(_) => return,
        };
        let Some(pid) = child.id() else {
            return;
        };

        kill_pids(&process_trees(&[pid]).await).await;

        let status = tokio::time::timeout(std::time::Duration::from_secs(5), child.wait())
            .await
            .expect("child should exit after SIGKILL")
            .unwrap();
        assert!(!status.success());
    }

    #[test]
    fn test_blocking_kill_terminates_child() {
        let mut child = match std::process::Command::new("sleep").arg("30").spawn() {
            Ok(child) => child,
            Err(_) => return,
        };

        kill_pids_blocking(&[child.id(), 4_194_305]);

        let status = child.wait().unwrap();
        assert!(!status.success());
    }
}
