//! Selector-driven site profiles
//!
//! A [`SiteProfile`] describes where a shop keeps its price and shipping fee
//! in the rendered page. Extraction walks the price selectors in order and
//! takes the first element whose digits form a value above
//! [`MIN_PLAUSIBLE_PRICE`]; anything smaller is a discount rate or a badge.

use pricewatch_core::domain::price::{PriceResult, ShippingStatus};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tracing::warn;

use crate::error::{CrawlError, CrawlResult};

/// Prices at or below this value are ignored
pub const MIN_PLAUSIBLE_PRICE: i64 = 100;

/// Pages shorter than this are treated as bot challenges
pub const DEFAULT_MIN_MARKUP_BYTES: usize = 2000;

/// Text fragments announcing a product that cannot be bought
const SOLD_OUT_MARKERS: &[&str] = &[
    "매진",
    "품절",
    "판매종료",
    "판매 종료",
    "sold out",
    "soldout",
    "재고없음",
    "재고 없음",
    "구매불가",
    "구매 불가",
];

pub fn is_sold_out_text(text: &str) -> bool {
    let lower = text.to_lowercase();
    SOLD_OUT_MARKERS.iter().any(|m| lower.contains(m))
}

/// How to read prices from one shop
#[derive(Debug, Clone)]
pub struct SiteProfile {
    /// Registry key, e.g. `gsshop`
    pub name: String,

    /// Other names a job may use for this site
    pub aliases: Vec<String>,

    /// Hosts served by this site; subdomains match too
    pub domains: Vec<String>,

    /// Tried in order; first plausible value wins
    pub price_selectors: Vec<String>,

    /// Looked up inside the matched price element, preferred when present
    pub inner_price_selectors: Vec<String>,

    pub shipping_selectors: Vec<String>,

    /// Shipping text is cut at this marker before reading the fee
    pub shipping_split_marker: Option<String>,

    /// The site never lists a separate shipping fee
    pub shipping_not_applicable: bool,

    /// Time for scripts to render prices after navigation
    pub settle: Duration,

    pub min_markup_bytes: usize,

    /// Prices are rendered client-side; plain HTTP is useless
    pub requires_browser: bool,
}

impl SiteProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            aliases: Vec::new(),
            domains: Vec::new(),
            price_selectors: Vec::new(),
            inner_price_selectors: Vec::new(),
            shipping_selectors: Vec::new(),
            shipping_split_marker: None,
            shipping_not_applicable: false,
            settle: Duration::from_secs(3),
            min_markup_bytes: DEFAULT_MIN_MARKUP_BYTES,
            requires_browser: true,
        }
    }

    /// SSG.com
    pub fn ssg() -> Self {
        Self {
            aliases: strings(&["ssg.com"]),
            domains: strings(&["ssg.com"]),
            price_selectors: strings(&[
                ".cdtl_new_price.notranslate .ssg_price",
                ".price--3",
                ".price--3 ._salePrice",
                ".price--3 ._bestPrice",
                ".cdtl_price .ssg_price",
                ".price_total .ssg_price",
                "em.ssg_price",
                ".special_price .ssg_price",
                "._salePrice",
                "._bestPrice",
                ".div-best ._bestPrice",
                ".total_price .price em",
            ]),
            inner_price_selectors: strings(&["._salePrice", "._bestPrice"]),
            shipping_selectors: strings(&[
                ".cdtl_dl.cdtl_delivery_fee li em.ssg_price",
                ".delivery_fee .ssg_price",
                ".cdtl_delivery_fee em",
            ]),
            settle: Duration::from_secs(5),
            ..Self::new("ssg")
        }
    }

    /// Shinsegae TV Shopping
    pub fn shinsegae() -> Self {
        Self {
            aliases: strings(&["shinsegaetvshopping", "ssg_shoping", "신세계"]),
            domains: strings(&["shinsegaetvshopping.com"]),
            price_selectors: strings(&[".div-best ._bestPrice", ".total_price .price em"]),
            shipping_not_applicable: true,
            settle: Duration::from_secs(10),
            ..Self::new("shinsegae")
        }
    }

    /// CJ OnStyle
    pub fn cj() -> Self {
        Self {
            aliases: strings(&["cjonstyle", "cjonstyle.com"]),
            domains: strings(&["cjonstyle.com"]),
            price_selectors: strings(&[
                ".price_area .price_txt > strong.ff_price",
                ".price_area span:not(.txt_sale):not(.txt_del) > strong.ff_price",
                ".opt_area .item_price strong.ff_price",
            ]),
            shipping_selectors: strings(&[
                ".gift_delivery_wrap .delivery_fees strong",
                ".delivery_fees strong",
            ]),
            settle: Duration::from_secs(5),
            ..Self::new("cj")
        }
    }

    /// GS SHOP
    pub fn gs() -> Self {
        Self {
            aliases: strings(&["gsshop", "gsshop.com"]),
            domains: strings(&["gsshop.com"]),
            price_selectors: strings(&[
                ".price-definition-ins ins strong",
                "#totValue",
                "em#totValue",
            ]),
            shipping_selectors: strings(&[
                ".shipCate strong",
                "p.shipCate strong",
                ".paragraph1 .shipCate strong",
            ]),
            // "3,000원 (도서산간 추가 5,000원)": only the first amount counts
            shipping_split_marker: Some("원".to_string()),
            settle: Duration::from_secs(3),
            ..Self::new("gs")
        }
    }

    /// Every profile shipped with the engine
    pub fn builtin() -> Vec<Self> {
        vec![Self::ssg(), Self::shinsegae(), Self::cj(), Self::gs()]
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// A profile with its selectors parsed once
pub struct CompiledProfile {
    profile: SiteProfile,
    price: Vec<Selector>,
    inner_price: Vec<Selector>,
    shipping: Vec<Selector>,
}

impl CompiledProfile {
    /// Parses every selector; invalid ones are logged and skipped
    pub fn new(profile: SiteProfile) -> Self {
        let price = compile(&profile.name, &profile.price_selectors);
        let inner_price = compile(&profile.name, &profile.inner_price_selectors);
        let shipping = compile(&profile.name, &profile.shipping_selectors);
        Self {
            profile,
            price,
            inner_price,
            shipping,
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Reads price and shipping from a rendered page
    ///
    /// A page without a plausible price is `SoldOut` when it says so and a
    /// `Parse` error otherwise.
    pub fn extract(&self, markup: &str, url: &str) -> CrawlResult<PriceResult> {
        let document = Html::parse_document(markup);

        let Some(price) = self.find_price(&document) else {
            if is_sold_out_text(markup) {
                return Err(CrawlError::SoldOut(url.to_string()));
            }
            return Err(CrawlError::Parse(format!(
                "no price found on {} page {}",
                self.profile.name, url
            )));
        };

        let (fee, shipping) = self.find_shipping(&document);
        Ok(PriceResult::new(
            self.profile.name.as_str(),
            url,
            Some(price),
            fee,
            shipping,
        ))
    }

    fn find_price(&self, document: &Html) -> Option<i64> {
        self.price.iter().find_map(|selector| {
            document
                .select(selector)
                .find_map(|element| plausible_price(&self.price_text(element)))
        })
    }

    fn price_text(&self, element: ElementRef<'_>) -> String {
        self.inner_price
            .iter()
            .find_map(|inner| element.select(inner).next())
            .map(text_of)
            .unwrap_or_else(|| text_of(element))
    }

    fn find_shipping(&self, document: &Html) -> (Option<i64>, ShippingStatus) {
        if self.profile.shipping_not_applicable {
            return (None, ShippingStatus::NotApplicable);
        }

        let Some(element) = self
            .shipping
            .iter()
            .find_map(|selector| document.select(selector).next())
        else {
            return (Some(0), ShippingStatus::Free);
        };

        let text = text_of(element);
        let relevant = match &self.profile.shipping_split_marker {
            Some(marker) => text.split(marker.as_str()).next().unwrap_or_default(),
            None => text.as_str(),
        };

        let fee = digits(relevant).unwrap_or(0);
        let status = if fee > 0 {
            ShippingStatus::Paid
        } else {
            ShippingStatus::Free
        };
        (Some(fee), status)
    }
}

fn compile(site: &str, selectors: &[String]) -> Vec<Selector> {
    selectors
        .iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(selector) => Some(selector),
            Err(e) => {
                warn!("Ignoring invalid selector {:?} for {}: {}", s, site, e);
                None
            }
        })
        .collect()
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

/// Number formed by all ASCII digits of `text`
fn digits(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

fn plausible_price(text: &str) -> Option<i64> {
    digits(text).filter(|&p| p > MIN_PLAUSIBLE_PRICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(body: &str) -> String {
        format!("<html><body>{}</body></html>", body)
    }

    #[test]
    fn test_first_plausible_price_wins() {
        let gs = CompiledProfile::new(SiteProfile::gs());
        let markup = page(
            r#"<div class="price-definition-ins"><ins><strong>15%</strong></ins></div>
               <em id="totValue">39,900</em>
               <p class="shipCate"><strong>3,000원 (제주 추가 5,000원)</strong></p>"#,
        );

        let result = gs.extract(&markup, "https://www.gsshop.com/prd/1").unwrap();
        assert_eq!(result.price(), Some(39_900));
        assert_eq!(result.shipping_fee(), Some(3_000));
        assert_eq!(result.shipping(), ShippingStatus::Paid);
        assert_eq!(result.total(), Some(42_900));
    }

    #[test]
    fn test_missing_shipping_means_free() {
        let cj = CompiledProfile::new(SiteProfile::cj());
        let markup = page(
            r#"<div class="price_area">
                 <span class="price_txt"><strong class="ff_price">12,500</strong></span>
               </div>"#,
        );

        let result = cj.extract(&markup, "https://display.cjonstyle.com/p/item/1").unwrap();
        assert_eq!(result.price(), Some(12_500));
        assert_eq!(result.shipping(), ShippingStatus::Free);
        assert_eq!(result.total(), Some(12_500));
    }

    #[test]
    fn test_cj_skips_struck_through_price() {
        let cj = CompiledProfile::new(SiteProfile::cj());
        let markup = page(
            r#"<div class="price_area">
                 <span class="txt_del"><strong class="ff_price">20,000</strong></span>
                 <span class="sale"><strong class="ff_price">15,000</strong></span>
               </div>"#,
        );

        let result = cj.extract(&markup, "https://display.cjonstyle.com/p/item/2").unwrap();
        assert_eq!(result.price(), Some(15_000));
    }

    #[test]
    fn test_inner_sale_price_is_preferred() {
        let ssg = CompiledProfile::new(SiteProfile::ssg());
        let markup = page(
            r#"<div class="price--3">정가 30,000 <span class="_salePrice">24,000</span></div>"#,
        );

        let result = ssg.extract(&markup, "https://www.ssg.com/item/1").unwrap();
        assert_eq!(result.price(), Some(24_000));
    }

    #[test]
    fn test_shipping_not_applicable() {
        let shinsegae = CompiledProfile::new(SiteProfile::shinsegae());
        let markup = page(r#"<div class="div-best"><span class="_bestPrice">54,000</span></div>"#);

        let result = shinsegae
            .extract(&markup, "https://www.shinsegaetvshopping.com/display/detail/1")
            .unwrap();
        assert_eq!(result.shipping(), ShippingStatus::NotApplicable);
        assert_eq!(result.shipping_fee(), None);
        assert_eq!(result.total(), Some(54_000));
    }

    #[test]
    fn test_sold_out_and_parse_errors() {
        let gs = CompiledProfile::new(SiteProfile::gs());

        let markup = page("<p>이 상품은 품절되었습니다</p>");
        let sold_out = gs.extract(&markup, "https://gs/1");
        assert!(matches!(sold_out, Err(CrawlError::SoldOut(_))));

        let empty = gs.extract(&page("<p>nothing</p>"), "https://gs/2");
        assert!(matches!(empty, Err(CrawlError::Parse(_))));
    }

    #[test]
    fn test_sold_out_markers_are_case_insensitive() {
        assert!(is_sold_out_text("SOLD OUT"));
        assert!(is_sold_out_text("판매 종료된 상품"));
        assert!(!is_sold_out_text("무료배송"));
    }

    #[test]
    fn test_invalid_selectors_are_skipped() {
        let mut profile = SiteProfile::new("broken");
        profile.price_selectors = strings(&["[[[", ".price"]);
        let compiled = CompiledProfile::new(profile);

        let result = compiled.extract(&page(r#"<b class="price">1,234</b>"#), "u").unwrap();
        assert_eq!(result.price(), Some(1_234));
    }

    #[test]
    fn test_builtin_profiles_require_browser() {
        let profiles = SiteProfile::builtin();
        assert_eq!(profiles.len(), 4);
        assert!(profiles.iter().all(|p| p.requires_browser));
        assert!(profiles.iter().all(|p| !p.domains.is_empty()));
    }
}
