use serde_json::Value;

use crate::error::{KubectlError, KubectlResult};

/// Incremental line-stream to JSON document decoder.
///
/// Watch invocations emit an unbounded stream of pretty-printed documents
/// back to back; the only framing is that each document opens with a line
/// starting at `{` in column zero and closes with `}` in column zero. The
/// decoder tracks those top-level boundaries and parses one document at a
/// time, keeping the framing concern out of every stream consumer.
#[derive(Debug, Default)]
pub struct DocDecoder {
    buf: String,
    in_document: bool,
}

impl DocDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line; returns a parsed document when it completes one.
    ///
    /// Lines seen outside any document are ignored. A completed document
    /// that fails to parse is an error for the caller to surface; the
    /// decoder resets and keeps accepting the rest of the stream.
    pub fn push(&mut self, line: &str) -> KubectlResult<Option<Value>> {
        if line.starts_with('{') && !self.in_document {
            self.in_document = true;
            self.buf.clear();
            self.buf.push_str("{\n");
            return Ok(None);
        }

        if !self.in_document {
            return Ok(None);
        }

        if line.starts_with('}') {
            self.buf.push('}');
            self.in_document = false;
            let text = std::mem::take(&mut self.buf);
            return match serde_json::from_str(&text) {
                Ok(doc) => Ok(Some(doc)),
                Err(e) => Err(KubectlError::Decode(e.to_string())),
            };
        }

        self.buf.push_str(line);
        self.buf.push('\n');
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(decoder: &mut DocDecoder, text: &str) -> Vec<Value> {
        let mut docs = Vec::new();
        for line in text.lines() {
            if let Some(doc) = decoder.push(line).unwrap() {
                docs.push(doc);
            }
        }
        docs
    }

    #[test]
    fn decodes_single_pretty_document() {
        let mut decoder = DocDecoder::new();
        let docs = feed(
            &mut decoder,
            "{\n    \"kind\": \"Pod\",\n    \"status\": {}\n}",
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["kind"], "Pod");
    }

    #[test]
    fn decodes_back_to_back_documents() {
        let mut decoder = DocDecoder::new();
        let docs = feed(
            &mut decoder,
            "{\n    \"n\": 1\n}\n{\n    \"n\": 2\n}",
        );
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["n"], 1);
        assert_eq!(docs[1]["n"], 2);
    }

    #[test]
    fn ignores_noise_outside_documents() {
        let mut decoder = DocDecoder::new();
        let docs = feed(&mut decoder, "warning: something\n{\n    \"n\": 1\n}");
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn nested_objects_do_not_end_the_document() {
        let mut decoder = DocDecoder::new();
        let docs = feed(
            &mut decoder,
            "{\n    \"status\": {\n        \"phase\": \"Running\"\n    }\n}",
        );
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["status"]["phase"], "Running");
    }

    #[test]
    fn malformed_document_is_an_error_and_decoder_recovers() {
        let mut decoder = DocDecoder::new();
        assert!(decoder.push("{").unwrap().is_none());
        assert!(decoder.push("  \"broken\": ,").unwrap().is_none());
        assert!(decoder.push("}").is_err());

        // Next document decodes fine.
        let docs = feed(&mut decoder, "{\n    \"ok\": true\n}");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0]["ok"], true);
    }
}
