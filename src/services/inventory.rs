//! Plex library response parser
//!
//! Turns the XML returned by `/library/sections/{id}/all` into archive
//! candidates. Only the shape below is read; everything else is ignored.
//!
//! ```xml
//! <MediaContainer size="1">
//!   <Video guid="plex://movie/5d7768" title="Heat" thumb="/library/metadata/42/thumb/1"
//!          viewCount="2" addedAt="1546300800" originallyAvailableAt="1995-12-15"
//!          lastViewedAt="1580515200">
//!     <Media>
//!       <Part file="/media/movies/Heat (1995)/Heat.mkv"/>
//!     </Media>
//!   </Video>
//! </MediaContainer>
//! ```

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use thiserror::Error;
use tracing::{debug, warn};

const VIDEO_TAG: &[u8] = b"Video";
const MEDIA_TAG: &[u8] = b"Media";
const PART_TAG: &[u8] = b"Part";

/// Raw inventory could not be read as XML
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("malformed inventory at byte {position}: {reason}")]
    Malformed { position: u64, reason: String },
}

/// A media item the server reports as eligible for archival
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaCandidate {
    /// Plex guid; empty when the server omitted it
    pub id: String,
    pub title: Option<String>,
    pub thumb: Option<String>,
    pub view_count: Option<i64>,
    /// Unix seconds
    pub added_at: Option<i64>,
    /// Release date as reported, e.g. `1995-12-15`
    pub originally_available_at: Option<String>,
    /// Unix seconds
    pub last_viewed_at: Option<i64>,
    /// Backing files in document order
    pub files: Vec<String>,
}

impl MediaCandidate {
    /// Title for log lines
    pub fn display_title(&self) -> &str {
        self.title.as_deref().unwrap_or("<untitled>")
    }
}

/// Parse a library listing into candidates.
///
/// Items without any backing file are dropped with a warning since there is
/// nothing to archive for them.
pub fn parse_inventory(raw: &str) -> Result<Vec<MediaCandidate>, InventoryError> {
    let mut reader = Reader::from_str(raw);
    reader.config_mut().trim_text(true);

    let mut candidates = Vec::new();
    let mut depth = 0usize;
    let mut seen_root = false;
    let mut current: Option<MediaCandidate> = None;
    let mut in_media = false;

    loop {
        let position = reader.buffer_position();
        let event = reader.read_event().map_err(|e| InventoryError::Malformed {
            position,
            reason: e.to_string(),
        })?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_empty = matches!(event, Event::Empty(_));
                let name = e.name();

                match depth {
                    0 => {
                        if seen_root {
                            return Err(malformed(position, "more than one root element"));
                        }
                        seen_root = true;
                    }
                    // Direct children of the container
                    1 if name.as_ref() == VIDEO_TAG => {
                        let candidate = read_video(e, position)?;
                        if is_empty {
                            finish_video(candidate, &mut candidates);
                        } else {
                            current = Some(candidate);
                        }
                    }
                    2 if current.is_some() && name.as_ref() == MEDIA_TAG => {
                        in_media = !is_empty;
                    }
                    3 if in_media && name.as_ref() == PART_TAG => {
                        if let Some(file) = attribute(e, b"file", position)?
                            && !file.trim().is_empty()
                            && let Some(ref mut candidate) = current
                        {
                            candidate.files.push(file);
                        }
                    }
                    _ => {}
                }

                if !is_empty {
                    depth += 1;
                }
            }
            Event::End(ref e) => {
                depth = depth.saturating_sub(1);
                match depth {
                    1 if e.name().as_ref() == VIDEO_TAG => {
                        if let Some(candidate) = current.take() {
                            finish_video(candidate, &mut candidates);
                        }
                    }
                    2 if e.name().as_ref() == MEDIA_TAG => in_media = false,
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                if depth == 0 && e.iter().any(|b| !b.is_ascii_whitespace()) {
                    return Err(malformed(position, "text outside of the root element"));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(malformed(position, "CDATA outside of the root element"));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !seen_root {
        return Err(malformed(reader.buffer_position(), "no root element"));
    }
    if depth != 0 {
        return Err(malformed(reader.buffer_position(), "unclosed element at end of input"));
    }

    debug!(count = candidates.len(), "Parsed inventory");
    Ok(candidates)
}

fn malformed(position: u64, reason: &str) -> InventoryError {
    InventoryError::Malformed {
        position,
        reason: reason.to_string(),
    }
}

fn finish_video(candidate: MediaCandidate, candidates: &mut Vec<MediaCandidate>) {
    if candidate.files.is_empty() {
        warn!(
            item_id = %candidate.id,
            title = candidate.display_title(),
            "No file found for item, skipping it"
        );
        return;
    }
    candidates.push(candidate);
}

fn read_video(e: &BytesStart<'_>, position: u64) -> Result<MediaCandidate, InventoryError> {
    Ok(MediaCandidate {
        id: attribute(e, b"guid", position)?.unwrap_or_default(),
        title: attribute(e, b"title", position)?,
        thumb: attribute(e, b"thumb", position)?,
        view_count: number(attribute(e, b"viewCount", position)?),
        added_at: number(attribute(e, b"addedAt", position)?),
        originally_available_at: attribute(e, b"originallyAvailableAt", position)?,
        last_viewed_at: number(attribute(e, b"lastViewedAt", position)?),
        files: Vec::new(),
    })
}

/// Unescaped value of an attribute, `None` when absent
fn attribute(
    e: &BytesStart<'_>,
    key: &[u8],
    position: u64,
) -> Result<Option<String>, InventoryError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|err| malformed(position, &err.to_string()))?;
        if attr.key.as_ref() == key {
            let value = attr
                .unescape_value()
                .map_err(|err| malformed(position, &err.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn number(value: Option<String>) -> Option<i64> {
    value.and_then(|v| v.trim().parse().ok())
}
