//! Section location: find the page range holding the eligibility criteria.
//!
//! Passes run from cheapest and most reliable to most expensive:
//!
//! 1. Table-of-contents parse (confidence 0.95). Protocols almost always
//!    carry a TOC in the first dozen pages, and a TOC entry naming the
//!    criteria section with a page number is the strongest signal available.
//! 2. Heuristic body scan (0.80): a criteria-keyword heading backed by at
//!    least five numbered list items.
//! 3. Model-assisted scan over per-page snippets (0.75), when enabled.
//! 4. Whole document (0.1) — extraction still works, just with a bigger
//!    prompt and weaker page grounding.
//!
//! Every pass is a plain function from document to optional location; the
//! chain is data, so adding or reordering passes does not touch control flow.

use crate::config::ScreenConfig;
use crate::llm::{strip_code_fences, CompletionClient};
use crate::model::{LocateMethod, PageText, ParsedDocument, SectionLocation};
use crate::prompts;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many leading pages may hold the TOC.
const TOC_SCAN_LIMIT: usize = 12;

/// Minimum confidence for a deterministic pass to win outright.
const HEURISTIC_ACCEPT: f32 = 0.7;

/// A heading match must be backed by this many numbered items to count as
/// the real criteria section rather than a cross-reference.
const MIN_CRITERIA_ITEMS: usize = 5;

/// Pages past the section start to include when no stop topic is found.
const SECTION_SPAN_CAP: usize = 15;

static CRITERIA_KEYWORDS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)(inclusion|exclusion)\s+(and\s+)?(exclusion\s+)?criteria",
        r"(?i)eligibility\s+criteria",
        r"(?i)enrollment\s+criteria",
        r"(?i)study\s+population",
        r"(?i)patient\s+selection",
        r"(?i)subject\s+selection",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("keyword pattern"))
    .collect()
});

/// A TOC line: criteria keyword, dot leaders, page number.
/// e.g. "5.1  Exclusion Criteria ....... 46"
static TOC_ENTRY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(?P<name>(?:inclusion|exclusion)(?:\s+(?:and\s+)?(?:exclusion\s+)?)?criteria|eligibility\s+criteria|enrollment\s+criteria|study\s+population|patient\s+selection|subject\s+selection)\s*\.{3,}\s*(?P<page>\d{1,4})",
    )
    .expect("TOC entry pattern")
});

static TOC_HEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)table\s+of\s+contents").expect("TOC header pattern"));

static DOT_LEADER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)\.{4,}\s*\d{1,3}\s*$").expect("dot leader pattern"));

/// Topics that follow the criteria section in standard protocol structure.
static STOP_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?im)^\s*\d*\.?\d*\.?\s*(?:study\s+(?:procedures?|design|objectives?|endpoints?)|treatment\s+(?:plan|regimen|administration)|statistical\s+(?:analysis|considerations)|pharmacokinetics)",
    )
    .expect("stop pattern")
});

static NUMBERED_ITEM: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*\d+[\.\)]\s").expect("numbered item pattern"));

/// One deterministic locator pass.
struct Pass {
    name: &'static str,
    /// Minimum confidence for this pass's answer to be accepted outright.
    accept: f32,
    run: fn(&ParsedDocument) -> Option<SectionLocation>,
}

const PASSES: &[Pass] = &[
    Pass {
        name: "toc",
        accept: 0.0,
        run: toc_locate,
    },
    Pass {
        name: "heuristic",
        accept: HEURISTIC_ACCEPT,
        run: heuristic_locate,
    },
];

/// Return the page range most likely to contain the eligibility criteria.
///
/// Never fails: the worst case is the whole document at confidence 0.1.
/// The model pass runs only when `config.llm_section_fallback` is set and a
/// client is available; on any model failure the best deterministic answer
/// (or the full-document fallback) stands.
pub async fn locate_eligibility_section(
    document: &ParsedDocument,
    client: Option<&Arc<dyn CompletionClient>>,
    config: &ScreenConfig,
) -> SectionLocation {
    let mut best_prior: Option<SectionLocation> = None;

    for pass in PASSES {
        if let Some(location) = (pass.run)(document) {
            if location.confidence >= pass.accept {
                info!(
                    pass = pass.name,
                    start = location.start_page,
                    end = location.end_page,
                    confidence = location.confidence,
                    section = location.section_name.as_deref().unwrap_or("?"),
                    "section located"
                );
                return location;
            }
            best_prior = Some(location);
        }
    }

    let prior = best_prior.unwrap_or_else(|| full_doc_fallback(document));

    if config.llm_section_fallback {
        if let Some(client) = client {
            info!(prior_confidence = prior.confidence, "section locator falling back to model");
            return llm_locate(client.as_ref(), document, prior).await;
        }
    }
    prior
}

fn full_doc_fallback(document: &ParsedDocument) -> SectionLocation {
    SectionLocation {
        start_page: 1,
        end_page: document.total_pages.max(1),
        section_name: None,
        confidence: 0.1,
        method: LocateMethod::FullDocFallback,
    }
}

// ── Pass 1: table of contents ────────────────────────────────────────────

fn toc_locate(document: &ParsedDocument) -> Option<SectionLocation> {
    // (section_name, target_page) for every criteria-like TOC entry
    let mut entries: Vec<(String, usize)> = Vec::new();

    for page in document
        .pages
        .iter()
        .filter(|p| p.page_number <= TOC_SCAN_LIMIT)
    {
        if !is_toc_page(&page.text) {
            continue;
        }
        for caps in TOC_ENTRY.captures_iter(&page.text) {
            let name = caps["name"].trim().to_string();
            if let Ok(target) = caps["page"].parse::<usize>() {
                // A printed page number outside the document (front matter
                // offsets, truncated scans) cannot anchor a valid range;
                // drop the entry and let the body scan decide.
                if target == 0 || target > document.total_pages {
                    debug!(entry = %name, target, total = document.total_pages,
                        "TOC entry points outside the document; ignored");
                    continue;
                }
                debug!(entry = %name, target, "TOC entry");
                entries.push((name, target));
            }
        }
    }

    if entries.is_empty() {
        return None;
    }

    // Prefer "inclusion/exclusion criteria" over "eligibility"/"enrollment",
    // and both over generic headings like "study population". Ties go to the
    // earliest page.
    entries.sort_by_key(|(name, page)| {
        let lower = name.to_lowercase();
        let rank = if lower.contains("inclusion") || lower.contains("exclusion") {
            0
        } else if lower.contains("eligib") || lower.contains("enrollment") {
            1
        } else {
            2
        };
        (rank, *page)
    });
    let (best_name, start_page) = entries[0].clone();

    // Include at least up to the last TOC-listed criteria page even when a
    // stop topic appears earlier; the TOC knows the true extent.
    let last_entry_page = entries.iter().map(|(_, p)| *p).max().unwrap_or(start_page);
    let end_page = find_end_page(&document.pages, start_page, document.total_pages)
        .max(last_entry_page)
        .min(document.total_pages);

    Some(SectionLocation {
        start_page,
        end_page: end_page.max(start_page),
        section_name: Some(best_name),
        confidence: 0.95,
        method: LocateMethod::Toc,
    })
}

// ── Pass 2: heuristic body scan ──────────────────────────────────────────

fn heuristic_locate(document: &ParsedDocument) -> Option<SectionLocation> {
    for page in &document.pages {
        if is_toc_page(&page.text) {
            continue;
        }
        for pattern in CRITERIA_KEYWORDS.iter() {
            let Some(m) = pattern.find(&page.text) else {
                continue;
            };
            let start_page = page.page_number;
            let end_page = find_end_page(&document.pages, start_page, document.total_pages);
            let items = count_criteria_items(&document.pages, start_page, end_page);
            if items >= MIN_CRITERIA_ITEMS {
                return Some(SectionLocation {
                    start_page,
                    end_page,
                    section_name: Some(m.as_str().trim().to_string()),
                    confidence: 0.80,
                    method: LocateMethod::Heuristic,
                });
            }
            // too few items behind this heading; keep scanning later pages
            break;
        }
    }
    None
}

// ── Pass 3: model-assisted ───────────────────────────────────────────────

#[derive(Deserialize)]
struct LocateResponse {
    start_page: usize,
    end_page: usize,
    #[serde(default)]
    section_name: Option<String>,
}

async fn llm_locate(
    client: &dyn CompletionClient,
    document: &ParsedDocument,
    prior: SectionLocation,
) -> SectionLocation {
    let prompt = prompts::build_section_detection_prompt(document);

    let raw = match client
        .complete(prompts::SECTION_DETECTION_SYSTEM, &prompt, 128)
        .await
    {
        Ok(raw) => raw,
        Err(e) => {
            warn!(error = %e, "section locator model call failed; keeping prior");
            return prior;
        }
    };

    match serde_json::from_str::<LocateResponse>(strip_code_fences(&raw)) {
        Ok(parsed) => {
            let total = document.total_pages.max(1);
            let start_page = parsed.start_page.clamp(1, total);
            let end_page = parsed.end_page.clamp(start_page, total);
            SectionLocation {
                start_page,
                end_page,
                section_name: parsed.section_name,
                confidence: 0.75,
                method: LocateMethod::Llm,
            }
        }
        Err(e) => {
            warn!(error = %e, "section locator model returned bad JSON; keeping prior");
            prior
        }
    }
}

// ── Shared helpers ───────────────────────────────────────────────────────

/// Scan forward from `start_page` for the first page carrying a follow-on
/// topic heading; the section ends on the page before it. Without a stop
/// topic the section is capped at `SECTION_SPAN_CAP` pages.
fn find_end_page(pages: &[PageText], start_page: usize, total_pages: usize) -> usize {
    for page in pages.iter().filter(|p| p.page_number > start_page) {
        if STOP_PATTERN.is_match(&page.text) {
            return (page.page_number - 1).max(start_page);
        }
    }
    (start_page + SECTION_SPAN_CAP).min(total_pages)
}

/// Count numbered list items ("1. ", "12) ") across a page range.
fn count_criteria_items(pages: &[PageText], start_page: usize, end_page: usize) -> usize {
    pages
        .iter()
        .filter(|p| start_page <= p.page_number && p.page_number <= end_page)
        .map(|p| NUMBERED_ITEM.find_iter(&p.text).count())
        .sum()
}

/// True when the page looks like a table of contents: an explicit header or
/// at least three dot-leader lines.
fn is_toc_page(text: &str) -> bool {
    TOC_HEADER.is_match(text) || DOT_LEADER.find_iter(text).count() >= 3
}
