use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};

use crate::client::WikiClient;
use crate::domain::{FetchedPage, QueueItem, SourceType};

/// Flags controlling which discovery rules run. Names mirror the
/// enumerated config surface from the discovery rules: `enableMacroChildren`
/// and `enableInclude` gate rules 1 and 2, `enableMentionDiscovery` and
/// `enableProfileDiscovery` independently gate the two ways rule 4 finds a
/// user reference, and `maxUsersPerPage` bounds how many type-4 items a
/// single page can emit regardless of how many candidates it contains.
/// Internal-link discovery (rule 3) has no suppression flag upstream; it
/// is always active.
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub enable_macro_children: bool,
    pub enable_include: bool,
    pub enable_mention_discovery: bool,
    pub enable_profile_discovery: bool,
    pub max_users_per_page: usize,
    /// Usernames that are never turned into synthetic `user:<name>` items
    /// (service accounts, the "Anonymous" placeholder, etc).
    pub system_usernames: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig {
            enable_macro_children: true,
            enable_include: true,
            enable_mention_discovery: true,
            enable_profile_discovery: true,
            max_users_per_page: 50,
            system_usernames: vec![
                "system".into(),
                "admin".into(),
                "anonymous".into(),
                "confluence".into(),
                "jira".into(),
            ],
        }
    }
}

/// Context a discovery pass needs beyond the page body itself: which space
/// this run is exporting (to scope include-macro title resolution) and the
/// instance base URL (to tell internal links from external ones).
#[derive(Debug, Clone)]
pub struct DiscoveryContext {
    pub space_key: String,
    pub base_url: String,
}

static CHILD_MACRO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-macro-name=\"children\"], .child-pages-macro").unwrap());
static INCLUDE_MACRO_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-macro-name=\"include\"], .page-include-macro").unwrap());
static LINK_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static MENTION_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[data-username], .user-mention").unwrap());
static PAGE_ID_IN_HREF: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:pageId=|/pages/)(\d+)").unwrap());
static PROFILE_HREF: Lazy<Regex> = Lazy::new(|| Regex::new(r"/display/~([A-Za-z0-9_.\-]+)").unwrap());
static AT_MENTION: Lazy<Regex> = Lazy::new(|| Regex::new(r"\B@([A-Za-z0-9_.\-]{2,})").unwrap());
static VALID_USERNAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-]+$").unwrap());

fn is_system_or_malformed(config: &DiscoveryConfig, username: &str) -> bool {
    if username.is_empty() || !VALID_USERNAME.is_match(username) {
        return true;
    }
    config
        .system_usernames
        .iter()
        .any(|sys| sys.eq_ignore_ascii_case(username))
}

/// Runs the ordered discovery rules over a fetched page's HTML body and
/// returns the new `QueueItem`s it implies.
///
/// Rule order is fixed and always: child listings, page includes, internal
/// links, user mentions. Rules 1 and 2 call back into `client` to resolve
/// children/titles to concrete page ids — the raw storage-format macro
/// markup never carries that information itself, only a reference to
/// resolve. Rules 3 and 4 work entirely from the already-fetched HTML and
/// require no further I/O.
pub async fn extract(
    page: &FetchedPage,
    config: &DiscoveryConfig,
    context: &DiscoveryContext,
    client: &dyn WikiClient,
) -> Vec<QueueItem> {
    let document = Html::parse_document(&page.body_html);
    let mut items = Vec::new();
    // Shared across rules 1-3 so a page reachable through more than one
    // rule in the same call (e.g. linked to directly and also resolved via
    // a child-listing macro) only emits one `QueueItem` for it, per the
    // "duplicates within a call are collapsed" contract of the whole
    // function, not just the user-mention rule.
    let mut seen_ids = std::collections::HashSet::new();

    if config.enable_macro_children {
        for el in document.select(&CHILD_MACRO_SELECTOR) {
            let target = el.value().attr("data-root-id").unwrap_or(&page.id);
            match client.list_children(target).await {
                Ok(children) => {
                    for child in children {
                        if !seen_ids.insert(child.id.clone()) {
                            continue;
                        }
                        items.push(
                            QueueItem::new_pending(child.id, child.title, SourceType::Macro)
                                .with_parent(page.id.clone()),
                        );
                    }
                }
                Err(e) => {
                    tracing::debug!(page = %page.id, error = %e, "child-listing macro resolution failed");
                }
            }
        }
    }

    if config.enable_include {
        for el in document.select(&INCLUDE_MACRO_SELECTOR) {
            let Some(title) = el.value().attr("data-page-title") else {
                continue;
            };
            match client.get_page_by_title(&context.space_key, title).await {
                Ok(Some(resolved)) => {
                    if !seen_ids.insert(resolved.id.clone()) {
                        continue;
                    }
                    items.push(
                        QueueItem::new_pending(resolved.id, resolved.title, SourceType::Macro)
                            .with_parent(page.id.clone()),
                    );
                }
                Ok(None) => {
                    tracing::debug!(page = %page.id, title, "include macro title did not resolve to a page");
                }
                Err(e) => {
                    tracing::debug!(page = %page.id, title, error = %e, "include macro resolution failed");
                }
            }
        }
    }

    // Rule 3 has no suppression flag upstream; internal-link discovery is
    // always active.
    for el in document.select(&LINK_SELECTOR) {
        let href = el.value().attr("href").unwrap_or("");
        let resource_id = el.value().attr("data-linked-resource-id").map(|s| s.to_string());
        if href.is_empty() && resource_id.is_none() {
            continue;
        }
        let is_internal = resource_id.is_some()
            || href.starts_with(&context.base_url)
            || PAGE_ID_IN_HREF.is_match(href);
        if !is_internal {
            continue;
        }
        let Some(id) = resource_id.or_else(|| {
            PAGE_ID_IN_HREF
                .captures(href)
                .map(|c| c[1].to_string())
        }) else {
            continue;
        };
        if !seen_ids.insert(id.clone()) {
            continue;
        }
        let title = el.text().collect::<String>();
        let title = if title.trim().is_empty() { id.clone() } else { title };
        items.push(QueueItem::new_pending(id, title, SourceType::Reference).with_parent(page.id.clone()));
    }

    let mut user_candidates: Vec<String> = Vec::new();

    if config.enable_mention_discovery {
        for el in document.select(&MENTION_SELECTOR) {
            if let Some(username) = el.value().attr("data-username") {
                user_candidates.push(username.to_string());
            }
        }
        for text in document.root_element().text() {
            for cap in AT_MENTION.captures_iter(text) {
                user_candidates.push(cap[1].to_string());
            }
        }
    }

    if config.enable_profile_discovery {
        for el in document.select(&LINK_SELECTOR) {
            let href = el.value().attr("href").unwrap_or("");
            if let Some(cap) = PROFILE_HREF.captures(href) {
                user_candidates.push(cap[1].to_string());
            }
        }
    }

    let mut seen_users = std::collections::HashSet::new();
    for username in user_candidates {
        if is_system_or_malformed(config, &username) {
            continue;
        }
        if !seen_users.insert(username.clone()) {
            continue;
        }
        if seen_users.len() > config.max_users_per_page {
            break;
        }
        let synthetic_id = format!("user:{username}");
        items.push(
            QueueItem::new_pending(synthetic_id, username, SourceType::User).with_parent(page.id.clone()),
        );
    }

    items
}
