use std::str::Utf8Error;

/// A single delivery handed to a consumer.
///
/// `delivery_tag` is assigned by the broker and is only meaningful to the
/// channel that delivered the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub body: Vec<u8>,
    pub delivery_tag: u64,
    pub redelivered: bool,
}

impl Message {
    pub fn new(body: impl Into<Vec<u8>>, delivery_tag: u64) -> Self {
        Self {
            body: body.into(),
            delivery_tag,
            redelivered: false,
        }
    }

    /// Decode the body as UTF-8 text.
    ///
    /// # Errors
    /// Returns the UTF-8 error when the body is not valid text.
    pub fn text(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// Short printable form of the body for log lines.
    pub fn preview(&self) -> String {
        const MAX_PREVIEW: usize = 200;

        match self.text() {
            Ok(s) if s.len() > MAX_PREVIEW => {
                let mut end = MAX_PREVIEW;
                while !s.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &s[..end])
            }
            Ok(s) => s.to_string(),
            Err(_) => format!("<binary data, {} bytes>", self.body.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_decodes_utf8() {
        let msg = Message::new("héllo", 1);
        assert_eq!(msg.text().unwrap(), "héllo");
        assert!(!msg.redelivered);
    }

    #[test]
    fn text_rejects_invalid_utf8() {
        let msg = Message::new(vec![0xff, 0xfe], 7);
        assert!(msg.text().is_err());
        assert_eq!(msg.preview(), "<binary data, 2 bytes>");
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let body = "é".repeat(150);
        let msg = Message::new(body, 1);
        let preview = msg.preview();
        assert!(preview.ends_with("..."));
        assert!(preview.len() <= 203);
    }
}
