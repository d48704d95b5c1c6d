//! The protocol-to-prescreen pipeline stages.
//!
//! Data flows strictly forward:
//!
//! ```text
//! PDF file
//!   → classify   PdfType (text / scanned / hybrid / encrypted / unknown)
//!   → extract    ParsedDocument (per-page text, OCR where needed)
//!   → locate     SectionLocation (eligibility section page range)
//!   → criteria   ExtractedCriteria (structured criteria via completion call)
//!   → rank       ExtractedCriteria (disqualification powers + top-N)
//!   → screen     ScreeningResult (per-patient decision)
//! ```
//!
//! Each stage is a free function over the data model plus the capability
//! traits it needs (`PdfSource`, `OcrEngine`, `CompletionClient`), so every
//! stage is testable in isolation with stubs. The orchestrator in
//! [`crate::run`] wires them together.

pub mod classify;
pub mod criteria;
pub mod extract;
pub mod locate;
pub mod rank;
pub mod screen;
