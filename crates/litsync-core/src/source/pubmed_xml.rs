//! PubMed `PubmedArticleSet` batch parser.
//!
//! Streams the document with quick-xml and builds one `RawItem` per
//! `PubmedArticle`:
//!
//! | payload field | element                                                |
//! |---------------|--------------------------------------------------------|
//! | `title`       | `ArticleTitle`                                         |
//! | `journal`     | `Journal/Title`                                        |
//! | `author`      | `Author` as "LastName ForeName", or `CollectiveName`  |
//! | `year`        | `PubDate/Year`                                         |
//! | `abstract`    | `AbstractText` (one value per section)                 |
//! | `language`    | `Language`                                             |
//! | `mesh`        | `MeshHeading/DescriptorName`                           |
//! | `doi`         | `ArticleIdList/ArticleId[@IdType="doi"]`               |
//!
//! The external id is `MedlineCitation/PMID`; citation targets are the
//! `ArticleId[@IdType="pubmed"]` entries under `ReferenceList`. An article
//! without a PMID becomes a `RecordDefect`. XML syntax errors fail the
//! whole batch since nothing after them can be trusted.

use crate::{Payload, RawItem, RawRecord, RecordDefect};
use quick_xml::Reader as XmlReader;
use quick_xml::events::{BytesStart, Event};

#[derive(Debug, Clone, Copy)]
enum Slot {
    Pmid,
    Field(&'static str),
    Reference,
    LastName,
    ForeName,
    CollectiveName,
}

#[derive(Debug, Default)]
struct AuthorName {
    last: Option<String>,
    fore: Option<String>,
    collective: Option<String>,
}

impl AuthorName {
    fn display(self) -> Option<String> {
        match (self.last, self.fore, self.collective) {
            (Some(last), Some(fore), _) => Some(format!("{last} {fore}")),
            (Some(last), None, _) => Some(last),
            (None, _, Some(collective)) => Some(collective),
            (None, _, None) => None,
        }
    }
}

#[derive(Debug, Default)]
struct ArticleState {
    pmid: Option<String>,
    payload: Payload,
    references: Vec<String>,
    author: Option<AuthorName>,
}

impl ArticleState {
    fn fill(&mut self, slot: Slot, text: String) {
        if text.is_empty() {
            return;
        }
        match slot {
            Slot::Pmid => {
                if self.pmid.is_none() {
                    self.pmid = Some(text);
                }
            }
            Slot::Field(field) => self.payload.push(field, text),
            Slot::Reference => self.references.push(text),
            Slot::LastName | Slot::ForeName | Slot::CollectiveName => {
                let author = self.author.get_or_insert_with(AuthorName::default);
                match slot {
                    Slot::LastName => author.last = Some(text),
                    Slot::ForeName => author.fore = Some(text),
                    _ => author.collective = Some(text),
                }
            }
        }
    }

    fn finish_author(&mut self) {
        if let Some(name) = self.author.take().and_then(AuthorName::display) {
            self.payload.push("author", name);
        }
    }

    fn finish(self, position: usize) -> RawItem {
        match self.pmid {
            Some(pmid) => RawRecord {
                external_id: pmid,
                payload: self.payload,
                citation_target_ids: self.references,
            }
            .into(),
            None => RecordDefect {
                position,
                external_id: None,
                reason: "PubmedArticle without MedlineCitation/PMID".to_string(),
            }
            .into(),
        }
    }
}

fn id_type(e: &BytesStart<'_>) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == b"IdType")
        .and_then(|attr| attr.unescape_value().ok())
        .map(|v| v.to_string())
}

/// Which payload slot an opening element feeds, given its ancestors.
fn slot_for(stack: &[Vec<u8>], e: &BytesStart<'_>) -> Option<Slot> {
    let parent = stack.last().map(Vec::as_slice);
    let in_references = stack.iter().any(|n| n.as_slice() == b"ReferenceList");

    match (e.name().as_ref(), parent) {
        (b"PMID", Some(b"MedlineCitation")) => Some(Slot::Pmid),
        (b"ArticleTitle", _) => Some(Slot::Field("title")),
        (b"Title", Some(b"Journal")) => Some(Slot::Field("journal")),
        (b"Year", Some(b"PubDate")) => Some(Slot::Field("year")),
        (b"AbstractText", _) => Some(Slot::Field("abstract")),
        (b"Language", _) => Some(Slot::Field("language")),
        (b"DescriptorName", Some(b"MeshHeading")) => Some(Slot::Field("mesh")),
        (b"LastName", Some(b"Author")) => Some(Slot::LastName),
        (b"ForeName", Some(b"Author")) => Some(Slot::ForeName),
        (b"CollectiveName", Some(b"Author")) => Some(Slot::CollectiveName),
        (b"ArticleId", Some(b"ArticleIdList")) => match id_type(e).as_deref() {
            Some("pubmed") if in_references => Some(Slot::Reference),
            Some("doi") if !in_references => Some(Slot::Field("doi")),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a `PubmedArticleSet` document.
pub fn parse_pubmed_xml(xml: &str) -> Result<Vec<RawItem>, String> {
    let mut reader = XmlReader::from_str(xml);
    reader.trim_text(true);

    let mut buf = Vec::new();
    let mut stack: Vec<Vec<u8>> = Vec::new();
    let mut article: Option<ArticleState> = None;
    // Slot being captured, the stack depth it opened at, and its text so far.
    let mut capture: Option<(Slot, usize, String)> = None;
    let mut items = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.name().as_ref().to_vec();
                if name.as_slice() == b"PubmedArticle" {
                    article = Some(ArticleState::default());
                } else if article.is_some() && capture.is_none() {
                    capture = slot_for(&stack, e).map(|slot| (slot, stack.len(), String::new()));
                }
                stack.push(name);
            }
            Ok(Event::End(ref e)) => {
                stack.pop();

                let closes = matches!(&capture, Some((_, depth, _)) if *depth == stack.len());
                let closed = if closes { capture.take() } else { None };
                if let (Some((slot, _, text)), Some(state)) = (closed, article.as_mut()) {
                    state.fill(slot, text);
                }

                match e.name().as_ref() {
                    b"Author" => {
                        if let Some(state) = article.as_mut() {
                            state.finish_author();
                        }
                    }
                    b"PubmedArticle" => {
                        if let Some(state) = article.take() {
                            let position = items.len();
                            items.push(state.finish(position));
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    let chunk = e
                        .unescape()
                        .map_err(|err| format!("bad text at byte {}: {err}", reader.buffer_position()))?;
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(chunk.trim());
                }
            }
            Ok(Event::CData(ref e)) => {
                if let Some((_, _, text)) = capture.as_mut() {
                    if !text.is_empty() {
                        text.push(' ');
                    }
                    text.push_str(String::from_utf8_lossy(e).trim());
                }
            }
            Ok(Event::Eof) => break,
            Err(err) => {
                return Err(format!(
                    "XML error at byte {}: {err}",
                    reader.buffer_position()
                ));
            }
            _ => {}
        }
        buf.clear();
    }

    if article.is_some() {
        return Err("document ends inside a PubmedArticle".to_string());
    }
    Ok(items)
}
