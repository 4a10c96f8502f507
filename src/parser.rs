//! Internal module for decoding fetched messages.

use crate::error::{Error, Result};
use mailparse::{parse_mail, MailHeaderMap, ParsedMail};
use tracing::debug;

/// The parts of a raw message the poll worker cares about.
#[derive(Debug)]
pub(crate) struct DecodedMessage {
    /// Raw `From` header value, if present.
    pub from: Option<String>,
    /// Decoded HTML body, if the message has one.
    pub html: Option<String>,
}

impl DecodedMessage {
    /// Returns `true` if the `From` header contains `sender`, ignoring case.
    pub fn is_from(&self, sender: &str) -> bool {
        self.from
            .as_deref()
            .is_some_and(|from| from.to_lowercase().contains(&sender.to_lowercase()))
    }
}

/// Parses a raw RFC 822 message and decodes its HTML body.
pub(crate) fn decode_message(raw: &[u8]) -> Result<DecodedMessage> {
    let parsed = parse_mail(raw).map_err(|source| Error::ParseEmail { source })?;

    let from = parsed.headers.get_first_value("From");
    let html = find_html_body(&parsed)?;

    debug!(
        has_from = from.is_some(),
        has_html = html.is_some(),
        parts = parsed.subparts.len(),
        "Decoded message"
    );

    Ok(DecodedMessage { from, html })
}

/// Finds the first `text/html` part, depth first; a single-part message qualifies
/// only if it is itself `text/html`.
fn find_html_body(part: &ParsedMail<'_>) -> Result<Option<String>> {
    if part.subparts.is_empty() {
        if part.ctype.mimetype.eq_ignore_ascii_case("text/html") {
            return part
                .get_body()
                .map(Some)
                .map_err(|source| Error::ExtractBody { source });
        }
        return Ok(None);
    }

    for subpart in &part.subparts {
        if let Some(html) = find_html_body(subpart)? {
            return Ok(Some(html));
        }
    }

    Ok(None)
}
