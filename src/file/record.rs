//! One line per message: `receipt,visible_at,base64(body)`.
//!
//! The receipt column is empty for unclaimed messages. Bodies are base64 so
//! commas, newlines and arbitrary bytes never reach the line framing.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::message::{Message, ReceiptToken};
use crate::{Error, Result};

pub(crate) fn encode(message: &Message) -> String {
    let receipt = message.receipt().map(ReceiptToken::as_str).unwrap_or("");
    format!(
        "{receipt},{},{}",
        message.visible_at(),
        STANDARD.encode(message.body())
    )
}

pub(crate) fn decode(line: &str) -> Result<Message> {
    let mut cols = line.splitn(3, ',');
    let receipt = cols.next().unwrap_or("");
    let visible_at = cols
        .next()
        .ok_or(Error::Corrupt("record missing visible_at"))?
        .parse::<u64>()
        .map_err(|_| Error::Corrupt("record visible_at invalid"))?;
    let body = cols.next().ok_or(Error::Corrupt("record missing body"))?;
    let body = STANDARD
        .decode(body)
        .map_err(|_| Error::Corrupt("record body is not base64"))?;
    let receipt = (!receipt.is_empty()).then(|| ReceiptToken::from_string(receipt));
    Ok(Message::from_parts(body, receipt, visible_at))
}

/// The receipt column, without decoding the rest of the line.
pub(crate) fn receipt_of(line: &str) -> &str {
    line.split_once(',').map_or(line, |(receipt, _)| receipt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn unclaimed_record_has_empty_receipt() {
        let line = encode(&Message::new("hi"));
        assert_eq!(line, ",0,aGk=");
        assert_eq!(receipt_of(&line), "");
        let decoded = decode(&line).unwrap();
        assert!(decoded.receipt().is_none());
        assert_eq!(decoded.body(), b"hi");
    }

    #[test]
    fn hostile_bodies_survive_the_line_format() {
        let bodies: [&[u8]; 4] = [
            b"message\nmessage",
            b"a,b,,c",
            b"",
            &[0, 0xff, b'\r', b'\n', b','],
        ];
        for body in bodies {
            let mut message = Message::new(body);
            message.claim(ReceiptToken::generate(), 42, Duration::from_millis(8));
            let line = encode(&message);
            assert!(!line.contains('\n'));
            assert_eq!(decode(&line).unwrap(), message);
        }
    }

    #[test]
    fn receipt_column_is_readable_without_decoding() {
        let mut message = Message::new("body");
        let token = ReceiptToken::from_string("3f1c");
        message.claim(token, 0, Duration::ZERO);
        assert_eq!(receipt_of(&encode(&message)), "3f1c");
    }

    #[test]
    fn malformed_lines_are_corrupt() {
        for line in ["", "abc", "t,notanumber,aGk=", "t,1", "t,1,@@@"] {
            assert!(
                matches!(decode(line), Err(Error::Corrupt(_))),
                "{line:?} decoded"
            );
        }
    }
}
