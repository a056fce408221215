//! Incremental fetch: every item of a site modified after a watermark.
//!
//! Each content type is walked independently with offset pagination. The
//! walk is bounded by the total the source reports on the first page, so a
//! collection that grows (or lies about its size) mid-walk cannot keep it
//! going forever. Duplicates caused by items shifting between pages are
//! collapsed by id.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::{SourceConfig, MAX_PAGE_SIZE};
use crate::connector_wpcom::{ItemSource, PageQuery};
use crate::error::SourceError;
use crate::models::{Item, SiteRecord};
use crate::progress::{SyncEvent, SyncReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchOptions {
    pub page_size: usize,
    /// Stop a content type's walk at the first non-empty page with no item
    /// newer than the watermark.
    pub early_exit: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_size: MAX_PAGE_SIZE,
            early_exit: false,
        }
    }
}

impl FetchOptions {
    pub fn from_config(config: &SourceConfig) -> Self {
        Self {
            page_size: config.page_size.clamp(1, MAX_PAGE_SIZE),
            early_exit: config.early_exit,
        }
    }
}

/// Fetch every item of `content_types` modified strictly after `watermark`.
///
/// Items come back in arrival order: content types in the order given,
/// pages in source order. Any source error aborts the whole fetch.
pub async fn fetch_modified_since(
    source: &dyn ItemSource,
    site: &SiteRecord,
    watermark: DateTime<Utc>,
    content_types: &[String],
    options: FetchOptions,
    reporter: &dyn SyncReporter,
) -> Result<Vec<Item>, SourceError> {
    let limit = options.page_size.max(1);
    let mut collector = ItemCollector::default();

    for content_type in content_types {
        reporter.report(SyncEvent::FetchStarted {
            site_id: site.site_id.clone(),
            content_type: content_type.clone(),
            watermark,
        });

        let mut offset = 0;
        let mut total: Option<usize> = None;
        loop {
            let query = PageQuery {
                content_type: content_type.clone(),
                offset,
                limit,
            };
            let page = source.list_items(site, &query).await?;
            let bound = *total.get_or_insert(page.found);

            let returned = page.items.len();
            let mut matching = 0;
            for item in page.items {
                if item.modified > watermark {
                    matching += 1;
                    collector.push(item);
                }
            }

            reporter.report(SyncEvent::PageFetched {
                site_id: site.site_id.clone(),
                content_type: content_type.clone(),
                offset,
                found: page.found,
                returned,
                matching,
            });

            if returned == 0 {
                break;
            }
            if options.early_exit && matching == 0 {
                reporter.report(SyncEvent::EarlyExit {
                    site_id: site.site_id.clone(),
                    content_type: content_type.clone(),
                    offset,
                });
                break;
            }
            if offset + limit >= bound {
                break;
            }
            offset += limit;
        }
    }

    let items = collector.finish();
    reporter.report(SyncEvent::FetchFinished {
        site_id: site.site_id.clone(),
        items: items.len(),
    });
    Ok(items)
}

/// Keeps one entry per item id: the latest modification wins, first arrival
/// wins ties, and the first arrival's position is kept.
#[derive(Default)]
struct ItemCollector {
    items: Vec<Item>,
    positions: HashMap<u64, usize>,
}

impl ItemCollector {
    fn push(&mut self, item: Item) {
        match self.positions.get(&item.id) {
            Some(&idx) => {
                if item.modified > self.items[idx].modified {
                    self.items[idx] = item;
                }
            }
            None => {
                self.positions.insert(item.id, self.items.len());
                self.items.push(item);
            }
        }
    }

    fn finish(self) -> Vec<Item> {
        self.items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector_wpcom::ItemPage;
    use crate::progress::{NoReporter, RecordingReporter};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn item(id: u64, hour: u32) -> Item {
        Item {
            id,
            content_type: "post".into(),
            modified: at(hour),
            title: format!("item {id}"),
            content: "<p>body</p>".into(),
        }
    }

    /// Serves fixed pages per content type, ignoring `limit`.
    struct PagedSource {
        pages: HashMap<String, Vec<ItemPage>>,
        requests: Mutex<Vec<PageQuery>>,
    }

    impl PagedSource {
        fn new(pages: Vec<(&str, Vec<ItemPage>)>) -> Self {
            Self {
                pages: pages
                    .into_iter()
                    .map(|(t, p)| (t.to_string(), p))
                    .collect(),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<PageQuery> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ItemSource for PagedSource {
        async fn list_items(
            &self,
            _site: &SiteRecord,
            query: &PageQuery,
        ) -> Result<ItemPage, SourceError> {
            self.requests.lock().unwrap().push(query.clone());
            let pages = self.pages.get(&query.content_type).cloned().unwrap_or_default();
            Ok(pages
                .get(query.offset / query.limit)
                .cloned()
                .unwrap_or_default())
        }

        async fn get_item(&self, _site: &SiteRecord, item_id: u64) -> Result<Item, SourceError> {
            Err(SourceError::Status {
                status: 404,
                body: format!("no item {item_id}"),
            })
        }
    }

    fn site() -> SiteRecord {
        SiteRecord::new("1", "tok", "https://blog.example", "ds")
    }

    fn page(found: usize, items: Vec<Item>) -> ItemPage {
        ItemPage { found, items }
    }

    fn opts(page_size: usize) -> FetchOptions {
        FetchOptions {
            page_size,
            early_exit: false,
        }
    }

    #[tokio::test]
    async fn test_filters_by_watermark_across_pages() {
        let source = PagedSource::new(vec![(
            "post",
            vec![
                page(5, vec![item(1, 9), item(2, 8)]),
                page(5, vec![item(3, 5), item(4, 4)]),
                page(5, vec![item(5, 1)]),
            ],
        )]);

        let items = fetch_modified_since(
            &source,
            &site(),
            at(4),
            &["post".into()],
            opts(2),
            &NoReporter,
        )
        .await
        .unwrap();

        let ids: Vec<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        let offsets: Vec<usize> = source.requests().iter().map(|q| q.offset).collect();
        assert_eq!(offsets, vec![0, 2, 4]);
    }

    #[tokio::test]
    async fn test_bound_is_first_reported_total() {
        // Every page claims the collection has grown; the walk still stops
        // at the first page's total.
        let source = PagedSource::new(vec![(
            "post",
            vec![
                page(4, vec![item(1, 9), item(2, 8)]),
                page(100, vec![item(3, 7), item(4, 6)]),
                page(200, vec![item(5, 5), item(6, 4)]),
            ],
        )]);

        let items = fetch_modified_since(
            &source,
            &site(),
            at(0),
            &["post".into()],
            opts(2),
            &NoReporter,
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 4);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_empty_page_stops_walk() {
        let source = PagedSource::new(vec![("post", vec![page(10, vec![item(1, 9)])])]);
        let items = fetch_modified_since(
            &source,
            &site(),
            at(0),
            &["post".into()],
            opts(1),
            &NoReporter,
        )
        .await
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_out_of_order_items_full_walk() {
        // An old item on the first page must not hide newer ones later.
        let source = PagedSource::new(vec![(
            "post",
            vec![
                page(4, vec![item(1, 9), item(2, 1)]),
                page(4, vec![item(3, 1), item(4, 8)]),
            ],
        )]);
        let items = fetch_modified_since(
            &source,
            &site(),
            at(5),
            &["post".into()],
            opts(2),
            &NoReporter,
        )
        .await
        .unwrap();
        let ids: Vec<u64> = items.iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[tokio::test]
    async fn test_early_exit_stops_at_stale_page() {
        let source = PagedSource::new(vec![(
            "post",
            vec![
                page(6, vec![item(1, 9), item(2, 8)]),
                page(6, vec![item(3, 2), item(4, 1)]),
                page(6, vec![item(5, 9), item(6, 9)]),
            ],
        )]);
        let reporter = RecordingReporter::new();
        let items = fetch_modified_since(
            &source,
            &site(),
            at(5),
            &["post".into()],
            FetchOptions {
                page_size: 2,
                early_exit: true,
            },
            &reporter,
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(source.requests().len(), 2);
        assert!(reporter
            .events()
            .iter()
            .any(|e| matches!(e, SyncEvent::EarlyExit { offset: 2, .. })));
    }

    #[tokio::test]
    async fn test_duplicates_collapse_to_latest() {
        let mut newer = item(1, 9);
        newer.title = "newer".into();
        let source = PagedSource::new(vec![
            ("post", vec![page(2, vec![item(1, 6), item(2, 7)])]),
            ("page", vec![page(2, vec![newer, item(2, 7)])]),
        ]);

        let items = fetch_modified_since(
            &source,
            &site(),
            at(0),
            &["post".into(), "page".into()],
            opts(10),
            &NoReporter,
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, 1);
        assert_eq!(items[0].title, "newer");
        assert_eq!(items[1].id, 2);
    }

    #[tokio::test]
    async fn test_each_content_type_walked() {
        let source = PagedSource::new(vec![
            ("post", vec![page(1, vec![item(1, 9)])]),
            ("page", vec![page(1, vec![item(2, 9)])]),
        ]);
        let reporter = RecordingReporter::new();
        let items = fetch_modified_since(
            &source,
            &site(),
            at(0),
            &["post".into(), "page".into()],
            opts(10),
            &reporter,
        )
        .await
        .unwrap();

        assert_eq!(items.len(), 2);
        let types: Vec<String> = source
            .requests()
            .into_iter()
            .map(|q| q.content_type)
            .collect();
        assert_eq!(types, vec!["post", "page"]);
        assert!(matches!(
            reporter.events().last(),
            Some(SyncEvent::FetchFinished { items: 2, .. })
        ));
    }

    #[test]
    fn test_options_clamp_page_size() {
        let mut config = SourceConfig::default();
        config.page_size = 0;
        assert_eq!(FetchOptions::from_config(&config).page_size, 1);
        config.page_size = 500;
        assert_eq!(FetchOptions::from_config(&config).page_size, MAX_PAGE_SIZE);
    }
}
