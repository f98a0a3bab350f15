use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::RunCache;
use crate::config::{DEFAULT_CATEGORY_ID, DEFAULT_CONCURRENCY, MigrateConfig};
use crate::error::{MigrateError, is_validation_error};
use crate::wordpress::{
    ArticleDraft, SourceApi, WordPressClient, WordPressPage, derive_page_category,
};
use crate::zendesk::{
    HelpCenterApi, HelpCenterArticle, HelpCenterCategory, HelpCenterSection, ZendeskClient,
};

/// Stand-in id for categories and sections a dry run would create.
pub const PLANNED_ID: u64 = 0;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub default_category: u64,
    pub concurrency: usize,
    pub dry_run: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            default_category: DEFAULT_CATEGORY_ID,
            concurrency: DEFAULT_CONCURRENCY,
            dry_run: false,
        }
    }
}

/// What happened to one WordPress page.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ArticleOutcome {
    Created { article_id: u64 },
    Updated { article_id: u64 },
    Unchanged { article_id: u64 },
    WouldCreate,
    WouldUpdate { article_id: u64 },
    Skipped { reason: String },
    Failed { reason: String },
}

impl ArticleOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Updated { .. } => "updated",
            Self::Unchanged { .. } => "unchanged",
            Self::WouldCreate => "would_create",
            Self::WouldUpdate { .. } => "would_update",
            Self::Skipped { .. } => "skipped",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    pub page_id: u64,
    pub title: Option<String>,
    pub wordpress_category: u64,
    pub section_id: Option<u64>,
    #[serde(flatten)]
    pub outcome: ArticleOutcome,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct MigrationReport {
    pub success: bool,
    pub dry_run: bool,
    pub pages: usize,
    pub categories: usize,
    pub categories_created: usize,
    pub sections_created: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    pub results: Vec<PageResult>,
    pub source_requests: usize,
    pub sink_requests: usize,
}

#[derive(Debug, Default)]
struct ResolutionStats {
    categories_created: usize,
    sections_created: usize,
}

struct CategoryRun {
    error: Option<String>,
    results: Vec<PageResult>,
}

/// Build live clients from `config` and run one migration.
pub fn migrate(config: &MigrateConfig, dry_run: bool) -> Result<MigrationReport> {
    let source = WordPressClient::new(config.wordpress.clone())?;
    let sink = ZendeskClient::new(config.zendesk.clone())?;
    let options = MigrationOptions {
        default_category: config.wordpress.default_category,
        concurrency: config.concurrency,
        dry_run,
    };
    Migrator::new(&source, &sink, options).run()
}

/// Reconciles WordPress content against a Help Center for a single run.
pub struct Migrator<'a, S: SourceApi, H: HelpCenterApi> {
    source: &'a S,
    sink: &'a H,
    cache: RunCache,
    options: MigrationOptions,
    // Held for the whole of a category/section resolution so that two
    // categories sharing a name never both create it.
    resolution: Mutex<ResolutionStats>,
}

impl<'a, S: SourceApi, H: HelpCenterApi> Migrator<'a, S, H> {
    pub fn new(source: &'a S, sink: &'a H, options: MigrationOptions) -> Self {
        Self {
            source,
            sink,
            cache: RunCache::new(),
            options,
            resolution: Mutex::new(ResolutionStats::default()),
        }
    }

    pub fn run(&self) -> Result<MigrationReport> {
        let pages = self
            .source
            .fetch_pages()
            .context("failed to fetch WordPress pages")?;
        let articles = self
            .cache
            .articles(|| self.sink.list_articles())
            .context("failed to list Zendesk articles")?;
        let category_ids = distinct_category_ids(&pages, self.options.default_category);
        info!(
            pages = pages.len(),
            existing_articles = articles.len(),
            categories = category_ids.len(),
            dry_run = self.options.dry_run,
            "starting migration"
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.concurrency.max(1))
            .build()
            .context("failed to build migration worker pool")?;
        let runs: Vec<CategoryRun> = pool.install(|| {
            category_ids
                .par_iter()
                .map(|category_id| self.migrate_category(*category_id, &pages, &articles))
                .collect()
        });

        let mut report = MigrationReport {
            dry_run: self.options.dry_run,
            pages: pages.len(),
            categories: category_ids.len(),
            ..MigrationReport::default()
        };
        for run in runs {
            if let Some(error) = run.error {
                report.errors.push(error);
            }
            for result in run.results {
                match &result.outcome {
                    ArticleOutcome::Created { .. } | ArticleOutcome::WouldCreate => {
                        report.created += 1
                    }
                    ArticleOutcome::Updated { .. } | ArticleOutcome::WouldUpdate { .. } => {
                        report.updated += 1
                    }
                    ArticleOutcome::Unchanged { .. } => report.unchanged += 1,
                    ArticleOutcome::Skipped { .. } => report.skipped += 1,
                    ArticleOutcome::Failed { reason } => {
                        report.failed += 1;
                        report.errors.push(format!(
                            "{}: {reason}",
                            result
                                .title
                                .clone()
                                .unwrap_or_else(|| format!("page {}", result.page_id))
                        ));
                    }
                }
                report.results.push(result);
            }
        }
        {
            let stats = self
                .resolution
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            report.categories_created = stats.categories_created;
            report.sections_created = stats.sections_created;
        }
        report.source_requests = self.source.request_count();
        report.sink_requests = self.sink.request_count();
        report.success = report.failed == 0 && report.errors.is_empty();

        info!(
            created = report.created,
            updated = report.updated,
            unchanged = report.unchanged,
            skipped = report.skipped,
            failed = report.failed,
            categories_created = report.categories_created,
            sections_created = report.sections_created,
            "migration complete"
        );
        Ok(report)
    }

    /// Find or create the Zendesk category named `category_name` and the
    /// same-named section inside it; returns the section id.
    pub fn resolve_category_and_section(&self, category_name: &str) -> Result<u64> {
        if category_name.trim().is_empty() {
            return Err(MigrateError::validation("missing category name").into());
        }
        let mut stats = self
            .resolution
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let categories = self
            .cache
            .categories(|| self.sink.list_categories())
            .context("failed to list Zendesk categories")?;
        let category_id = match categories.iter().find(|item| item.name == category_name) {
            Some(existing) => existing.id,
            None => {
                let id = self.create_category(category_name)?;
                stats.categories_created += 1;
                id
            }
        };

        let sections = self
            .cache
            .sections(|| self.sink.list_sections())
            .context("failed to list Zendesk sections")?;
        let section_id = match sections
            .iter()
            .find(|item| item.name == category_name && item.category_id == category_id)
        {
            Some(existing) => existing.id,
            None => {
                let id = self.create_section(category_id, category_name)?;
                stats.sections_created += 1;
                id
            }
        };
        debug!(category = category_name, category_id, section_id, "resolved section");
        Ok(section_id)
    }

    /// Create, update or leave alone the article matching `draft` in `section_id`.
    ///
    /// Never fails: write errors come back as [`ArticleOutcome::Failed`].
    pub fn reconcile_article(
        &self,
        section_id: u64,
        draft: &ArticleDraft,
        existing: &[HelpCenterArticle],
    ) -> ArticleOutcome {
        match find_matching_article(existing, section_id, draft) {
            Some(article) if draft.modified_at > article.updated_at => {
                if self.options.dry_run {
                    return ArticleOutcome::WouldUpdate {
                        article_id: article.id,
                    };
                }
                match self.sink.update_article_translation(article.id, draft) {
                    Ok(_) => {
                        info!(title = %draft.title, article_id = article.id, "updated article");
                        ArticleOutcome::Updated {
                            article_id: article.id,
                        }
                    }
                    Err(error) => write_failed(&draft.title, "cannot update article", &error),
                }
            }
            Some(article) => ArticleOutcome::Unchanged {
                article_id: article.id,
            },
            None => {
                if self.options.dry_run {
                    return ArticleOutcome::WouldCreate;
                }
                match self.sink.create_article(section_id, draft) {
                    Ok(article) => {
                        info!(title = %draft.title, article_id = article.id, section_id, "created article");
                        ArticleOutcome::Created {
                            article_id: article.id,
                        }
                    }
                    Err(error) => write_failed(&draft.title, "cannot migrate page", &error),
                }
            }
        }
    }

    fn migrate_category(
        &self,
        category_id: u64,
        pages: &[WordPressPage],
        articles: &[HelpCenterArticle],
    ) -> CategoryRun {
        let members = pages
            .iter()
            .filter(|page| derive_page_category(page, self.options.default_category) == category_id)
            .collect::<Vec<_>>();

        let resolved = self
            .cache
            .category_name(category_id, || {
                self.source.fetch_category_name(category_id)
            })
            .with_context(|| format!("failed to resolve WordPress category {category_id}"))
            .and_then(|name| self.resolve_category_and_section(&name));

        match resolved {
            Ok(section_id) => {
                let results = members
                    .par_iter()
                    .map(|page| self.migrate_page(page, category_id, section_id, articles))
                    .collect();
                CategoryRun {
                    error: None,
                    results,
                }
            }
            Err(error) => {
                let reason = format!("{error:#}");
                warn!(category_id, pages = members.len(), reason = %reason, "skipping category");
                let skipped = is_validation_error(&error);
                let outcome = if skipped {
                    ArticleOutcome::Skipped {
                        reason: reason.clone(),
                    }
                } else {
                    ArticleOutcome::Failed {
                        reason: reason.clone(),
                    }
                };
                let results = members
                    .iter()
                    .map(|page| PageResult {
                        page_id: page.id,
                        title: page.title.as_ref().map(|title| title.rendered.clone()),
                        wordpress_category: category_id,
                        section_id: None,
                        outcome: outcome.clone(),
                    })
                    .collect();
                // Validation problems skip the pages without failing the run.
                CategoryRun {
                    error: (!skipped).then(|| format!("category {category_id}: {reason}")),
                    results,
                }
            }
        }
    }

    fn migrate_page(
        &self,
        page: &WordPressPage,
        category_id: u64,
        section_id: u64,
        articles: &[HelpCenterArticle],
    ) -> PageResult {
        let (title, outcome) = match ArticleDraft::from_page(page) {
            Ok(draft) => {
                let outcome = self.reconcile_article(section_id, &draft, articles);
                (Some(draft.title), outcome)
            }
            Err(error) => {
                warn!(page = %page.label(), reason = %error, "skipping page");
                (
                    None,
                    ArticleOutcome::Skipped {
                        reason: error.to_string(),
                    },
                )
            }
        };
        PageResult {
            page_id: page.id,
            title,
            wordpress_category: category_id,
            section_id: Some(section_id),
            outcome,
        }
    }

    fn create_category(&self, name: &str) -> Result<u64> {
        if self.options.dry_run {
            info!(category = name, "would create category");
            self.cache.remember_category(HelpCenterCategory {
                id: PLANNED_ID,
                name: name.to_string(),
            });
            return Ok(PLANNED_ID);
        }
        let created = self
            .sink
            .create_category(name)
            .with_context(|| format!("failed to create Zendesk category {name}"))?;
        info!(category = name, category_id = created.id, "created category");
        let id = created.id;
        self.cache.remember_category(created);
        Ok(id)
    }

    fn create_section(&self, category_id: u64, name: &str) -> Result<u64> {
        if self.options.dry_run {
            info!(section = name, category_id, "would create section");
            self.cache.remember_section(HelpCenterSection {
                id: PLANNED_ID,
                name: name.to_string(),
                category_id,
            });
            return Ok(PLANNED_ID);
        }
        let created = self
            .sink
            .create_section(category_id, name)
            .with_context(|| format!("failed to create Zendesk section {name}"))?;
        info!(section = name, category_id, section_id = created.id, "created section");
        let id = created.id;
        self.cache.remember_section(created);
        Ok(id)
    }
}

/// Distinct derived category ids, in order of first appearance.
pub fn distinct_category_ids(pages: &[WordPressPage], default_category: u64) -> Vec<u64> {
    let mut seen = HashSet::new();
    pages
        .iter()
        .map(|page| derive_page_category(page, default_category))
        .filter(|id| seen.insert(*id))
        .collect()
}

/// First article in `section_id` whose title equals the draft's, ignoring case.
pub fn find_matching_article<'a>(
    existing: &'a [HelpCenterArticle],
    section_id: u64,
    draft: &ArticleDraft,
) -> Option<&'a HelpCenterArticle> {
    let key = draft.title_key();
    existing
        .iter()
        .find(|article| article.section_id == section_id && article.title.to_lowercase() == key)
}

fn write_failed(title: &str, message: &str, error: &anyhow::Error) -> ArticleOutcome {
    let reason = format!("{error:#}");
    warn!(title, reason = %reason, "{message}");
    ArticleOutcome::Failed { reason }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, TimeZone, Utc};

    use super::{
        ArticleOutcome, MigrationOptions, Migrator, PLANNED_ID, distinct_category_ids,
        find_matching_article,
    };
    use crate::wordpress::{ArticleDraft, Rendered, SourceApi, WordPressPage};
    use crate::zendesk::{
        ArticleTranslation, HelpCenterApi, HelpCenterArticle, HelpCenterCategory,
        HelpCenterSection,
    };

    #[derive(Default)]
    struct MockSource {
        pages: Vec<WordPressPage>,
        names: BTreeMap<u64, String>,
        fail_pages: bool,
        request_count: AtomicUsize,
    }

    impl SourceApi for MockSource {
        fn fetch_pages(&self) -> anyhow::Result<Vec<WordPressPage>> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            if self.fail_pages {
                anyhow::bail!("connection refused");
            }
            Ok(self.pages.clone())
        }

        fn fetch_category_name(&self, id: u64) -> anyhow::Result<String> {
            self.request_count.fetch_add(1, Ordering::Relaxed);
            self.names
                .get(&id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("category {id} not found"))
        }

        fn request_count(&self) -> usize {
            self.request_count.load(Ordering::Relaxed)
        }
    }

    #[derive(Default)]
    struct HelpCenterState {
        categories: Vec<HelpCenterCategory>,
        sections: Vec<HelpCenterSection>,
        articles: Vec<HelpCenterArticle>,
        created_categories: Vec<String>,
        created_sections: Vec<(u64, String)>,
        created_articles: Vec<(u64, String)>,
        updated_articles: Vec<(u64, String)>,
        category_listings: usize,
        next_id: u64,
        failing_titles: Vec<String>,
        request_count: usize,
    }

    #[derive(Default)]
    struct MockHelpCenter {
        state: Mutex<HelpCenterState>,
    }

    impl MockHelpCenter {
        fn with_state(state: HelpCenterState) -> Self {
            Self {
                state: Mutex::new(HelpCenterState {
                    next_id: 100,
                    ..state
                }),
            }
        }

        fn snapshot<T>(&self, read: impl FnOnce(&HelpCenterState) -> T) -> T {
            let state = self.state.lock().expect("state lock");
            read(&*state)
        }
    }

    impl HelpCenterApi for MockHelpCenter {
        fn list_categories(&self) -> anyhow::Result<Vec<HelpCenterCategory>> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            state.category_listings += 1;
            Ok(state.categories.clone())
        }

        fn list_sections(&self) -> anyhow::Result<Vec<HelpCenterSection>> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            Ok(state.sections.clone())
        }

        fn list_articles(&self) -> anyhow::Result<Vec<HelpCenterArticle>> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            Ok(state.articles.clone())
        }

        fn create_category(&self, name: &str) -> anyhow::Result<HelpCenterCategory> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            state.next_id += 1;
            let category = HelpCenterCategory {
                id: state.next_id,
                name: name.to_string(),
            };
            state.created_categories.push(name.to_string());
            state.categories.push(category.clone());
            Ok(category)
        }

        fn create_section(
            &self,
            category_id: u64,
            name: &str,
        ) -> anyhow::Result<HelpCenterSection> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            state.next_id += 1;
            let section = HelpCenterSection {
                id: state.next_id,
                name: name.to_string(),
                category_id,
            };
            state.created_sections.push((category_id, name.to_string()));
            state.sections.push(section.clone());
            Ok(section)
        }

        fn create_article(
            &self,
            section_id: u64,
            draft: &ArticleDraft,
        ) -> anyhow::Result<HelpCenterArticle> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            if state.failing_titles.contains(&draft.title) {
                anyhow::bail!("HTTP 500");
            }
            state.next_id += 1;
            let article = HelpCenterArticle {
                id: state.next_id,
                section_id,
                title: draft.title.clone(),
                body: Some(draft.body.clone()),
                updated_at: draft.modified_at,
            };
            state
                .created_articles
                .push((section_id, draft.title.clone()));
            state.articles.push(article.clone());
            Ok(article)
        }

        fn update_article_translation(
            &self,
            article_id: u64,
            draft: &ArticleDraft,
        ) -> anyhow::Result<ArticleTranslation> {
            let mut state = self.state.lock().expect("state lock");
            state.request_count += 1;
            if state.failing_titles.contains(&draft.title) {
                anyhow::bail!("HTTP 500");
            }
            state
                .updated_articles
                .push((article_id, draft.title.clone()));
            Ok(ArticleTranslation {
                id: article_id + 1_000,
                locale: Some("en-us".to_string()),
                title: Some(draft.title.clone()),
            })
        }

        fn request_count(&self) -> usize {
            self.state.lock().expect("state lock").request_count
        }
    }

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn wp_page(id: u64, title: &str, categories: Vec<u64>, modified: &str) -> WordPressPage {
        WordPressPage {
            id,
            title: Some(Rendered {
                rendered: title.to_string(),
            }),
            content: Some(Rendered {
                rendered: format!("<p>{title}</p>"),
            }),
            modified_gmt: Some(modified.to_string()),
            categories,
            guid: None,
        }
    }

    fn draft(title: &str, modified_at: DateTime<Utc>) -> ArticleDraft {
        ArticleDraft {
            title: title.to_string(),
            body: "<p>body</p>".to_string(),
            modified_at,
        }
    }

    fn article(id: u64, section_id: u64, title: &str, updated_at: DateTime<Utc>) -> HelpCenterArticle {
        HelpCenterArticle {
            id,
            section_id,
            title: title.to_string(),
            body: None,
            updated_at,
        }
    }

    fn investing_source() -> MockSource {
        MockSource {
            pages: vec![wp_page(1, "How to Invest", vec![7], "2020-06-01T00:00:00")],
            names: BTreeMap::from([(7, "Investing".to_string())]),
            ..MockSource::default()
        }
    }

    fn options() -> MigrationOptions {
        MigrationOptions {
            concurrency: 2,
            ..MigrationOptions::default()
        }
    }

    #[test]
    fn empty_help_center_gets_category_section_and_article() {
        let source = investing_source();
        let sink = MockHelpCenter::with_state(HelpCenterState::default());

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert!(report.success);
        assert_eq!(report.created, 1);
        assert_eq!(report.categories_created, 1);
        assert_eq!(report.sections_created, 1);
        sink.snapshot(|state| {
            assert_eq!(state.created_categories, vec!["Investing".to_string()]);
            let category_id = state.categories[0].id;
            assert_eq!(
                state.created_sections,
                vec![(category_id, "Investing".to_string())]
            );
            let section_id = state.sections[0].id;
            assert_eq!(
                state.created_articles,
                vec![(section_id, "How to Invest".to_string())]
            );
            assert!(state.updated_articles.is_empty());
        });
    }

    #[test]
    fn older_article_with_same_title_is_updated_not_duplicated() {
        let source = investing_source();
        let sink = MockHelpCenter::with_state(HelpCenterState {
            categories: vec![HelpCenterCategory {
                id: 10,
                name: "Investing".to_string(),
            }],
            sections: vec![HelpCenterSection {
                id: 20,
                name: "Investing".to_string(),
                category_id: 10,
            }],
            articles: vec![article(30, 20, "how to invest", at(2019, 1, 1))],
            ..HelpCenterState::default()
        });

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert_eq!(report.updated, 1);
        assert_eq!(report.created, 0);
        assert_eq!(
            report.results[0].outcome,
            ArticleOutcome::Updated { article_id: 30 }
        );
        sink.snapshot(|state| {
            assert!(state.created_categories.is_empty());
            assert!(state.created_sections.is_empty());
            assert!(state.created_articles.is_empty());
            assert_eq!(
                state.updated_articles,
                vec![(30, "How to Invest".to_string())]
            );
        });
    }

    #[test]
    fn equal_or_newer_article_is_left_alone() {
        let source = MockSource::default();
        let sink = MockHelpCenter::with_state(HelpCenterState::default());
        let migrator = Migrator::new(&source, &sink, options());
        let existing = vec![
            article(30, 20, "HOW TO INVEST", at(2020, 6, 1)),
            article(31, 21, "Saving", at(2018, 1, 1)),
        ];

        let same = migrator.reconcile_article(20, &draft("How to Invest", at(2020, 6, 1)), &existing);
        assert_eq!(same, ArticleOutcome::Unchanged { article_id: 30 });
        let older =
            migrator.reconcile_article(20, &draft("how to invest", at(2019, 6, 1)), &existing);
        assert_eq!(older, ArticleOutcome::Unchanged { article_id: 30 });

        sink.snapshot(|state| {
            assert!(state.created_articles.is_empty());
            assert!(state.updated_articles.is_empty());
        });
    }

    #[test]
    fn matching_is_scoped_to_the_section() {
        let existing = vec![article(30, 20, "Saving", at(2018, 1, 1))];
        assert!(find_matching_article(&existing, 21, &draft("saving", at(2020, 1, 1))).is_none());
        assert_eq!(
            find_matching_article(&existing, 20, &draft("saving", at(2020, 1, 1)))
                .map(|item| item.id),
            Some(30)
        );
    }

    #[test]
    fn resolving_twice_returns_the_same_section() {
        let source = MockSource::default();
        let sink = MockHelpCenter::with_state(HelpCenterState::default());
        let migrator = Migrator::new(&source, &sink, options());

        let first = migrator
            .resolve_category_and_section("Tips & Tricks")
            .expect("first");
        let second = migrator
            .resolve_category_and_section("Tips & Tricks")
            .expect("second");

        assert_eq!(first, second);
        sink.snapshot(|state| {
            assert_eq!(state.created_categories.len(), 1);
            assert_eq!(state.created_sections.len(), 1);
            assert_eq!(state.category_listings, 1);
        });
    }

    #[test]
    fn existing_section_under_another_category_is_not_reused() {
        let source = MockSource::default();
        let sink = MockHelpCenter::with_state(HelpCenterState {
            categories: vec![HelpCenterCategory {
                id: 10,
                name: "Investing".to_string(),
            }],
            sections: vec![HelpCenterSection {
                id: 20,
                name: "Investing".to_string(),
                category_id: 99,
            }],
            ..HelpCenterState::default()
        });
        let migrator = Migrator::new(&source, &sink, options());

        let section_id = migrator
            .resolve_category_and_section("Investing")
            .expect("resolve");

        assert_ne!(section_id, 20);
        sink.snapshot(|state| {
            assert!(state.created_categories.is_empty());
            assert_eq!(state.created_sections, vec![(10, "Investing".to_string())]);
        });
    }

    #[test]
    fn empty_category_name_is_a_validation_error() {
        let source = MockSource::default();
        let sink = MockHelpCenter::with_state(HelpCenterState::default());
        let migrator = Migrator::new(&source, &sink, options());
        let error = migrator
            .resolve_category_and_section("  ")
            .expect_err("must fail");
        assert!(crate::error::is_validation_error(&error));
    }

    #[test]
    fn dry_run_plans_without_writing() {
        let source = investing_source();
        let sink = MockHelpCenter::with_state(HelpCenterState::default());
        let report = Migrator::new(
            &source,
            &sink,
            MigrationOptions {
                dry_run: true,
                ..options()
            },
        )
        .run()
        .expect("run");

        assert!(report.dry_run);
        assert_eq!(report.created, 1);
        assert_eq!(report.results[0].outcome, ArticleOutcome::WouldCreate);
        assert_eq!(report.results[0].section_id, Some(PLANNED_ID));
        sink.snapshot(|state| {
            assert!(state.created_categories.is_empty());
            assert!(state.created_sections.is_empty());
            assert!(state.created_articles.is_empty());
        });
    }

    #[test]
    fn failed_write_is_reported_and_the_run_continues() {
        let source = MockSource {
            pages: vec![
                wp_page(1, "Broken", vec![7], "2020-06-01T00:00:00"),
                wp_page(2, "Fine", vec![7], "2020-06-01T00:00:00"),
            ],
            names: BTreeMap::from([(7, "Investing".to_string())]),
            ..MockSource::default()
        };
        let sink = MockHelpCenter::with_state(HelpCenterState {
            failing_titles: vec!["Broken".to_string()],
            ..HelpCenterState::default()
        });

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert!(report.errors[0].starts_with("Broken:"));
        assert_eq!(
            report.results[0].outcome,
            ArticleOutcome::Failed {
                reason: "HTTP 500".to_string()
            }
        );
    }

    #[test]
    fn invalid_pages_are_skipped() {
        let mut untitled = wp_page(3, "", vec![7], "2020-06-01T00:00:00");
        untitled.title = None;
        let source = MockSource {
            pages: vec![untitled, wp_page(4, "Valid", vec![7], "2020-06-01T00:00:00")],
            names: BTreeMap::from([(7, "Investing".to_string())]),
            ..MockSource::default()
        };
        let sink = MockHelpCenter::with_state(HelpCenterState::default());

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert!(report.success);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.created, 1);
        assert_eq!(
            report.results[0].outcome,
            ArticleOutcome::Skipped {
                reason: "page title missing".to_string()
            }
        );
    }

    #[test]
    fn blank_category_name_skips_its_pages_without_failing_the_run() {
        let source = MockSource {
            pages: vec![
                wp_page(1, "Orphan", vec![5], "2020-06-01T00:00:00"),
                wp_page(2, "How to Invest", vec![7], "2020-06-01T00:00:00"),
            ],
            names: BTreeMap::from([(5, "  ".to_string()), (7, "Investing".to_string())]),
            ..MockSource::default()
        };
        let sink = MockHelpCenter::with_state(HelpCenterState::default());

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert!(report.success);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.created, 1);
        assert!(report.errors.is_empty());
        let orphan = report
            .results
            .iter()
            .find(|result| result.page_id == 1)
            .expect("orphan result");
        assert_eq!(
            orphan.outcome,
            ArticleOutcome::Skipped {
                reason: "missing category name".to_string()
            }
        );
        sink.snapshot(|state| assert_eq!(state.created_categories, vec!["Investing".to_string()]));
    }

    #[test]
    fn unresolvable_category_fails_only_its_pages() {
        let source = MockSource {
            pages: vec![
                wp_page(1, "Orphan", vec![99], "2020-06-01T00:00:00"),
                wp_page(2, "How to Invest", vec![7], "2020-06-01T00:00:00"),
            ],
            names: BTreeMap::from([(7, "Investing".to_string())]),
            ..MockSource::default()
        };
        let sink = MockHelpCenter::with_state(HelpCenterState::default());

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert!(!report.success);
        assert_eq!(report.failed, 1);
        assert_eq!(report.created, 1);
        assert!(
            report
                .errors
                .iter()
                .any(|error| error.starts_with("category 99:"))
        );
    }

    #[test]
    fn categories_sharing_a_name_create_it_once() {
        let source = MockSource {
            pages: vec![
                wp_page(1, "One", vec![3], "2020-06-01T00:00:00"),
                wp_page(2, "Two", vec![4], "2020-06-01T00:00:00"),
            ],
            names: BTreeMap::from([(3, "Help".to_string()), (4, "Help".to_string())]),
            ..MockSource::default()
        };
        let sink = MockHelpCenter::with_state(HelpCenterState::default());

        let report = Migrator::new(&source, &sink, options()).run().expect("run");

        assert_eq!(report.created, 2);
        sink.snapshot(|state| {
            assert_eq!(state.created_categories.len(), 1);
            assert_eq!(state.created_sections.len(), 1);
        });
    }

    #[test]
    fn failed_page_fetch_aborts_the_run() {
        let source = MockSource {
            fail_pages: true,
            ..MockSource::default()
        };
        let sink = MockHelpCenter::with_state(HelpCenterState::default());
        let error = Migrator::new(&source, &sink, options())
            .run()
            .expect_err("must fail");
        assert!(format!("{error:#}").contains("connection refused"));
    }

    #[test]
    fn category_ids_are_distinct_in_first_seen_order() {
        let pages = vec![
            wp_page(1, "A", vec![3, 7], "2020-06-01T00:00:00"),
            wp_page(2, "B", Vec::new(), "2020-06-01T00:00:00"),
            wp_page(3, "C", vec![7], "2020-06-01T00:00:00"),
        ];
        assert_eq!(distinct_category_ids(&pages, 11), vec![7, 11]);
    }
}
