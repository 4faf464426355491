//! JSON response envelope builder
//!
//! An append-only, capacity-bounded buffer with typed field writers. Every
//! command response, success or failure, ends with the four standard
//! fields: `ClientTransactionID`, `ServerTransactionID`, `ErrorNumber`,
//! `ErrorMessage`. Exceeding the capacity is a reported error, never a
//! silent truncation.

/// Default envelope capacity.
pub const MAX_ENVELOPE_LEN: usize = 32 * 1024;

/// Whether a field writer appends a trailing comma.
pub const INCLUDE_COMMA: bool = true;
pub const NO_COMMA: bool = false;

/// Result type for envelope operations
pub type EnvelopeResult<T> = std::result::Result<T, EnvelopeError>;

/// Envelope construction failures
#[derive(Debug, Clone, thiserror::Error)]
pub enum EnvelopeError {
    /// Appending would exceed the buffer capacity
    #[error("envelope overflow: {needed} bytes needed, capacity {capacity}")]
    Overflow { needed: usize, capacity: usize },
}

/// Append-only JSON envelope writer.
#[derive(Debug)]
pub struct EnvelopeWriter {
    buf: String,
    max_len: usize,
}

impl EnvelopeWriter {
    /// Start a fresh envelope: `{` plus a newline.
    pub fn new() -> Self {
        Self::with_capacity(MAX_ENVELOPE_LEN)
    }

    pub fn with_capacity(max_len: usize) -> Self {
        let mut buf = String::with_capacity(256.min(max_len));
        buf.push_str("{\n");
        Self { buf, max_len }
    }

    fn append(&mut self, fragment: &str) -> EnvelopeResult<()> {
        let needed = self.buf.len() + fragment.len();
        if needed > self.max_len {
            return Err(EnvelopeError::Overflow { needed, capacity: self.max_len });
        }
        self.buf.push_str(fragment);
        Ok(())
    }

    fn terminator(comma: bool) -> &'static str {
        if comma {
            ",\n"
        } else {
            "\n"
        }
    }

    /// Append `"name": "value"` with JSON escaping.
    pub fn add_string(&mut self, name: &str, value: &str, comma: bool) -> EnvelopeResult<()> {
        let fragment = format!(
            "\t\"{}\": \"{}\"{}",
            escape_json(name),
            escape_json(value),
            Self::terminator(comma)
        );
        self.append(&fragment)
    }

    /// Append `"name": value` for a signed integer.
    pub fn add_i32(&mut self, name: &str, value: i32, comma: bool) -> EnvelopeResult<()> {
        let fragment =
            format!("\t\"{}\": {}{}", escape_json(name), value, Self::terminator(comma));
        self.append(&fragment)
    }

    /// Append `"name": value` for an unsigned integer.
    pub fn add_u32(&mut self, name: &str, value: u32, comma: bool) -> EnvelopeResult<()> {
        let fragment =
            format!("\t\"{}\": {}{}", escape_json(name), value, Self::terminator(comma));
        self.append(&fragment)
    }

    /// Append `"name": value` for a double.
    pub fn add_f64(&mut self, name: &str, value: f64, comma: bool) -> EnvelopeResult<()> {
        let fragment =
            format!("\t\"{}\": {:.6}{}", escape_json(name), value, Self::terminator(comma));
        self.append(&fragment)
    }

    /// Append `"name": true|false`.
    pub fn add_bool(&mut self, name: &str, value: bool, comma: bool) -> EnvelopeResult<()> {
        let fragment =
            format!("\t\"{}\": {}{}", escape_json(name), value, Self::terminator(comma));
        self.append(&fragment)
    }

    /// Append pre-formed JSON under a field name, unescaped.
    pub fn add_raw(&mut self, name: &str, raw: &str, comma: bool) -> EnvelopeResult<()> {
        let fragment =
            format!("\t\"{}\": {}{}", escape_json(name), raw, Self::terminator(comma));
        self.append(&fragment)
    }

    /// Open an incremental array value, e.g. for `devicestate`.
    pub fn begin_array(&mut self, name: &str) -> EnvelopeResult<()> {
        let fragment = format!("\t\"{}\": [\n", escape_json(name));
        self.append(&fragment)
    }

    /// Close an incremental array value.
    pub fn end_array(&mut self, comma: bool) -> EnvelopeResult<()> {
        self.append(if comma { "\t]," } else { "\t]" })?;
        self.append("\n")
    }

    /// One named-value object inside an open array.
    pub fn add_named_string(&mut self, name: &str, value: &str, comma: bool) -> EnvelopeResult<()> {
        let fragment = format!(
            "\t\t{{\"Name\": \"{}\", \"Value\": \"{}\"}}{}",
            escape_json(name),
            escape_json(value),
            Self::terminator(comma)
        );
        self.append(&fragment)
    }

    pub fn add_named_i32(&mut self, name: &str, value: i32, comma: bool) -> EnvelopeResult<()> {
        let fragment = format!(
            "\t\t{{\"Name\": \"{}\", \"Value\": {}}}{}",
            escape_json(name),
            value,
            Self::terminator(comma)
        );
        self.append(&fragment)
    }

    pub fn add_named_f64(&mut self, name: &str, value: f64, comma: bool) -> EnvelopeResult<()> {
        let fragment = format!(
            "\t\t{{\"Name\": \"{}\", \"Value\": {:.6}}}{}",
            escape_json(name),
            value,
            Self::terminator(comma)
        );
        self.append(&fragment)
    }

    pub fn add_named_bool(&mut self, name: &str, value: bool, comma: bool) -> EnvelopeResult<()> {
        let fragment = format!(
            "\t\t{{\"Name\": \"{}\", \"Value\": {}}}{}",
            escape_json(name),
            value,
            Self::terminator(comma)
        );
        self.append(&fragment)
    }

    /// Bytes used so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Append the standard transaction/error fields and close the object.
    pub fn finish(
        mut self,
        client_transaction_id: u32,
        server_transaction_id: u32,
        error_number: u32,
        error_message: &str,
    ) -> EnvelopeResult<String> {
        self.add_u32("ClientTransactionID", client_transaction_id, INCLUDE_COMMA)?;
        self.add_u32("ServerTransactionID", server_transaction_id, INCLUDE_COMMA)?;
        self.add_u32("ErrorNumber", error_number, INCLUDE_COMMA)?;
        self.add_string("ErrorMessage", error_message, NO_COMMA)?;
        self.append("}\n")?;
        Ok(self.buf)
    }
}

impl Default for EnvelopeWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Minimal JSON string escaping.
fn escape_json(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_is_valid_json() {
        let mut w = EnvelopeWriter::new();
        w.add_string("Device", "Sim Camera", INCLUDE_COMMA).unwrap();
        w.add_bool("Value", true, INCLUDE_COMMA).unwrap();
        let body = w.finish(7, 42, 0, "").unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["ClientTransactionID"], 7);
        assert_eq!(parsed["ServerTransactionID"], 42);
        assert_eq!(parsed["ErrorNumber"], 0);
        assert_eq!(parsed["ErrorMessage"], "");
        assert_eq!(parsed["Value"], true);
    }

    #[test]
    fn test_string_escaping() {
        let mut w = EnvelopeWriter::new();
        w.add_string("Value", "say \"hi\"\nback\\slash", INCLUDE_COMMA).unwrap();
        let body = w.finish(0, 0, 0, "").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["Value"], "say \"hi\"\nback\\slash");
    }

    #[test]
    fn test_overflow_is_reported() {
        let mut w = EnvelopeWriter::with_capacity(64);
        let long = "x".repeat(100);
        match w.add_string("Value", &long, NO_COMMA) {
            Err(EnvelopeError::Overflow { capacity: 64, .. }) => {}
            other => panic!("expected overflow, got {:?}", other),
        }
    }

    #[test]
    fn test_named_value_array() {
        let mut w = EnvelopeWriter::new();
        w.begin_array("Value").unwrap();
        w.add_named_bool("Connected", true, INCLUDE_COMMA).unwrap();
        w.add_named_f64("CCDTemperature", -10.5, INCLUDE_COMMA).unwrap();
        w.add_named_string("TimeStamp", "2026-01-01T00:00:00Z", NO_COMMA).unwrap();
        w.end_array(INCLUDE_COMMA).unwrap();
        let body = w.finish(1, 2, 0, "").unwrap();

        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        let arr = parsed["Value"].as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0]["Name"], "Connected");
        assert_eq!(arr[1]["Value"], -10.5);
    }

    #[test]
    fn test_error_envelope_round_trips() {
        let w = EnvelopeWriter::new();
        let body = w.finish(3, 9, 0x40B, "Unrecognized command").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["ErrorNumber"], 0x40B);
        assert_eq!(parsed["ErrorMessage"], "Unrecognized command");
    }
}
