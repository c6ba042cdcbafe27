//! Wire types of the change listing.

use serde::Deserialize;

use doccache_core::{ChangedDocument, DocId, Error, Timestamp};

/// One listing element as sent by the service.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedDocumentWire {
    pub doc_id: String,
    /// Milliseconds since the Unix epoch.
    pub update_time: i64,
}

/// Parse a listing body.
///
/// Entries whose id cannot be stored are dropped with a warning so one bad
/// id does not stall every later change.
pub fn parse_listing(body: &[u8]) -> Result<Vec<ChangedDocument>, Error> {
    let wire: Vec<ChangedDocumentWire> =
        serde_json::from_slice(body).map_err(|e| Error::SourceFailed(format!("malformed listing: {e}")))?;

    Ok(wire
        .into_iter()
        .filter_map(|item| match DocId::new(item.doc_id) {
            Ok(doc_id) => Some(ChangedDocument::new(doc_id, Timestamp::from_millis(item.update_time))),
            Err(e) => {
                tracing::warn!(error = %e, "skipping listed document");
                None
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_listing() {
        let listing = parse_listing(br#"[{"docId":"F7A2C91B","updateTime":1700000000000}]"#).unwrap();
        assert_eq!(
            listing,
            vec![ChangedDocument::new(DocId::new("F7A2C91B").unwrap(), Timestamp::from_millis(1_700_000_000_000))]
        );
    }

    #[test]
    fn test_parse_listing_skips_unusable_ids() {
        let listing = parse_listing(br#"[{"docId":"ab","updateTime":1},{"docId":"docA","updateTime":2}]"#).unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].doc_id.as_str(), "docA");
    }

    #[test]
    fn test_parse_listing_empty() {
        assert!(parse_listing(b"[]").unwrap().is_empty());
    }

    #[test]
    fn test_parse_listing_malformed() {
        let err = parse_listing(b"{\"oops\":true}").unwrap_err();
        assert!(matches!(err, Error::SourceFailed(msg) if msg.contains("malformed listing")));
    }
}
