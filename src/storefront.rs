//! Storefront locator and page driver.
//!
//! Owns one headless Chrome session per run: searches the Play store for
//! the requested app, resolves its app id from the first result link,
//! opens the entry's review panel, and scrolls until the page height
//! stops growing so the review API has hydrated content to serve. Every
//! wait is bounded with a fixed polling interval; a breached budget is
//! `UiInteractionTimeout`, a search with no result link is `NotFound`.
//! The session is released on every exit path (explicit `close` plus the
//! browser's own drop).

use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::ScrapeError;

const STORE_URL: &str = "https://play.google.com/store?hl=en&gl=us";
const SEARCH_INPUT: &str = r#"input[aria-label="Search Google Play"], input[type="search"]"#;
const RESULT_LINK: &str = r#".Qfxief, a[href*="/store/apps/details?id="]"#;
const SEE_MORE_BUTTON: &str =
    r#"button[aria-label="See more information on Ratings and reviews"]"#;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4 Safari/605.1.15",
    ]
});

/// The review platform's opaque key for one application, resolved once
/// per run and read-only thereafter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceHandle(String);

impl SourceHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Pulls the app id out of a storefront details URL, e.g.
/// `/store/apps/details?id=com.example.app` -> `com.example.app`.
pub fn app_id_from_url(url: &str) -> Option<&str> {
    let (_, id) = url.rsplit_once('=')?;
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

#[async_trait]
pub trait StorefrontLocator: Send {
    async fn locate(&mut self, query: &str) -> Result<SourceHandle, ScrapeError>;

    /// Releases any session held for the run. Idempotent.
    fn close(&mut self) {}
}

pub struct PlayStoreLocator {
    browser: Option<Browser>,
    headless: bool,
    wait_budget: Duration,
    poll_interval: Duration,
    scroll_pause: Duration,
    max_scrolls: u32,
}

impl PlayStoreLocator {
    pub fn new() -> Self {
        Self {
            browser: None,
            headless: true,
            wait_budget: Duration::from_secs(20),
            poll_interval: Duration::from_millis(1000),
            scroll_pause: Duration::from_secs(2),
            max_scrolls: 30,
        }
    }

    /// `SCRAPE_HEADLESS=false` keeps a visible window for debugging.
    pub fn from_env() -> Self {
        let mut locator = Self::new();
        if std::env::var("SCRAPE_HEADLESS").as_deref() == Ok("false") {
            locator.headless = false;
        }
        locator
    }

    fn launch(&self) -> Result<Browser, ScrapeError> {
        use rand::seq::SliceRandom;
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or(USER_AGENTS[0]);
        let ua_arg = format!("--user-agent={}", user_agent);

        let mut args = vec![
            std::ffi::OsStr::new("--disable-blink-features=AutomationControlled"),
            std::ffi::OsStr::new("--no-sandbox"),
            std::ffi::OsStr::new("--disable-dev-shm-usage"),
            std::ffi::OsStr::new("--disable-infobars"),
            std::ffi::OsStr::new("--ignore-certificate-errors"),
            std::ffi::OsStr::new("--incognito"),
        ];
        args.push(std::ffi::OsStr::new(&ua_arg));
        if self.headless {
            args.push(std::ffi::OsStr::new("--headless=new"));
        }

        Browser::new(LaunchOptions {
            headless: false, // controlled via --headless=new above
            window_size: Some((1920, 1080)),
            args,
            ..Default::default()
        })
        .map_err(ScrapeError::browser)
    }

    /// Bounded poll until the selector matches a visible element.
    async fn wait_visible(&self, tab: &Arc<Tab>, selector: &str) -> Result<(), ScrapeError> {
        let script = format!(
            "(() => {{ const el = document.querySelector({:?}); \
             return !!(el && el.offsetParent !== null); }})()",
            selector
        );
        let mut waited = Duration::ZERO;
        loop {
            let visible = tab
                .evaluate(&script, false)
                .map_err(ScrapeError::browser)?
                .value
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
            if visible {
                return Ok(());
            }
            if waited >= self.wait_budget {
                return Err(ScrapeError::UiInteractionTimeout {
                    element: selector.to_string(),
                    waited_ms: waited.as_millis() as u64,
                });
            }
            sleep(self.poll_interval).await;
            waited += self.poll_interval;
        }
    }

    fn page_height(&self, tab: &Arc<Tab>) -> Result<f64, ScrapeError> {
        let height = tab
            .evaluate("document.body.scrollHeight", false)
            .map_err(ScrapeError::browser)?
            .value
            .and_then(|v| v.as_f64())
            .unwrap_or(0.0);
        Ok(height)
    }

    /// Scrolls the review panel until two consecutive scrolls leave the
    /// content height unchanged, capped at `max_scrolls`.
    async fn scroll_until_stable(&self, tab: &Arc<Tab>) -> Result<(), ScrapeError> {
        let mut last_height = self.page_height(tab)?;
        let mut stable = 0u32;
        for _ in 0..self.max_scrolls {
            tab.evaluate("window.scrollTo(0, document.body.scrollHeight)", false)
                .map_err(ScrapeError::browser)?;
            sleep(self.scroll_pause).await;
            let new_height = self.page_height(tab)?;
            if (new_height - last_height).abs() < f64::EPSILON {
                stable += 1;
                if stable >= 2 {
                    break;
                }
            } else {
                stable = 0;
            }
            last_height = new_height;
        }
        Ok(())
    }

    async fn drive_search(&self, tab: &Arc<Tab>, query: &str) -> Result<SourceHandle, ScrapeError> {
        tracing::info!(url = STORE_URL, "opening storefront");
        tab.navigate_to(STORE_URL).map_err(ScrapeError::browser)?;
        tab.wait_until_navigated().map_err(ScrapeError::browser)?;

        // Activate the search UI, then wait for the input to render.
        tab.evaluate(
            r#"
            (() => {
                const icon = document.querySelector('button[aria-label="Search"]')
                    || document.querySelector('.google-material-icons[aria-hidden="true"]');
                if (icon) icon.click();
            })();
            "#,
            false,
        )
        .map_err(ScrapeError::browser)?;
        self.wait_visible(tab, SEARCH_INPUT).await?;

        tab.evaluate(
            &format!(
                "(() => {{ const input = document.querySelector({:?}); \
                 if (input) {{ input.click(); input.focus(); input.value = ''; }} }})()",
                SEARCH_INPUT
            ),
            false,
        )
        .map_err(ScrapeError::browser)?;

        tracing::info!(query, "typing search query");
        for ch in query.chars() {
            tab.type_str(&ch.to_string()).map_err(ScrapeError::browser)?;
            sleep(Duration::from_millis(60 + (rand::random::<u64>() % 90))).await;
        }
        tab.press_key("Enter").map_err(ScrapeError::browser)?;
        tab.wait_until_navigated().map_err(ScrapeError::browser)?;

        // No result link within the budget means the query matched nothing.
        let result = tab
            .wait_for_element_with_custom_timeout(RESULT_LINK, self.wait_budget)
            .map_err(|_| ScrapeError::NotFound(query.to_string()))?;

        // Parsed documents are not Send; keep them out of scope before
        // the next await point.
        let app_id = {
            let html = tab.get_content().map_err(ScrapeError::browser)?;
            let document = Html::parse_document(&html);
            let link_selector = Selector::parse(r#"a[href*="/store/apps/details?id="]"#).unwrap();
            let href = document
                .select(&link_selector)
                .next()
                .and_then(|el| el.value().attr("href"))
                .ok_or_else(|| ScrapeError::NotFound(query.to_string()))?;
            app_id_from_url(href)
                .ok_or_else(|| ScrapeError::NotFound(query.to_string()))?
                .to_string()
        };
        tracing::info!(%app_id, "resolved storefront entry");

        // Open the entry and expand its review panel.
        result.click().map_err(ScrapeError::browser)?;
        sleep(self.scroll_pause).await;
        let see_more = tab
            .wait_for_element_with_custom_timeout(SEE_MORE_BUTTON, self.wait_budget)
            .map_err(|_| ScrapeError::UiInteractionTimeout {
                element: SEE_MORE_BUTTON.to_string(),
                waited_ms: self.wait_budget.as_millis() as u64,
            })?;
        see_more.click().map_err(ScrapeError::browser)?;
        sleep(self.scroll_pause).await;

        self.scroll_until_stable(tab).await?;
        tracing::info!(%app_id, "review panel hydrated");

        Ok(SourceHandle::new(app_id))
    }
}

impl Default for PlayStoreLocator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorefrontLocator for PlayStoreLocator {
    async fn locate(&mut self, query: &str) -> Result<SourceHandle, ScrapeError> {
        let browser = self.launch()?;
        let tab = browser.new_tab().map_err(ScrapeError::browser)?;

        let outcome = self.drive_search(&tab, query).await;

        match outcome {
            Ok(handle) => {
                // Keep the session alive until the run finalizes; the
                // review API is only fruitful while the page stays warm.
                self.browser = Some(browser);
                Ok(handle)
            }
            Err(e) => {
                drop(browser);
                Err(e)
            }
        }
    }

    fn close(&mut self) {
        if self.browser.take().is_some() {
            tracing::info!("browser session released");
        }
    }
}
