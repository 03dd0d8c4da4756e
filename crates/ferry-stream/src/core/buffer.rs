use serde::Serialize;

use crate::data::{BufferOptions, Dispatch};

/// Estimated wire cost of `text`: two bytes per UTF-16 code unit.
///
/// This over-counts ASCII on purpose and must not be used as an exact
/// `Content-Length`.
pub fn estimate_bytes(text: &str) -> u64 { text.encode_utf16().count() as u64 * 2 }

/// Accumulates serialized records into one framed payload under a record cap
/// and a byte cap.
///
/// [`push`](Buffer::push) returns zero, one or two dispatches. Two happen when
/// a record does not fit next to what is already buffered and is itself big
/// enough to fill a fresh buffer.
///
/// Every dispatch respects both caps, except a single record that exceeds the
/// byte cap on its own; that record is dispatched alone.
#[derive(Debug)]
pub struct Buffer {
    options: BufferOptions,
    affix: u64,
    delimiter: u64,
    payload: String,
    records: u64,
    bytes: u64,
}

impl Buffer {
    pub fn new(options: BufferOptions) -> Self {
        let affix = estimate_bytes(&options.prefix) + estimate_bytes(&options.suffix);
        let delimiter = estimate_bytes(&options.delimiter);
        Self {
            options,
            affix,
            delimiter,
            payload: String::new(),
            records: 0,
            bytes: affix,
        }
    }

    pub fn push(&mut self, record: &str) -> Vec<Dispatch> {
        let cost = estimate_bytes(record);
        let mut flushed = Vec::new();

        if self.records > 0
            && let Some(cap) = self.options.bytes_per_request
            && self.bytes + self.delimiter + cost > cap
        {
            flushed.extend(self.flush());
        }

        if self.records > 0 {
            self.payload.push_str(&self.options.delimiter);
            self.bytes += self.delimiter;
        }
        self.payload.push_str(record);
        self.bytes += cost;
        self.records += 1;

        if self.is_full() {
            flushed.extend(self.flush());
        }

        flushed
    }

    /// Emit whatever is buffered. An empty buffer yields nothing.
    pub fn flush(&mut self) -> Option<Dispatch> {
        if self.records == 0 {
            return None;
        }

        let mut payload = String::with_capacity(
            self.options.prefix.len() + self.payload.len() + self.options.suffix.len(),
        );
        payload.push_str(&self.options.prefix);
        payload.push_str(&self.payload);
        payload.push_str(&self.options.suffix);

        let dispatch = Dispatch {
            payload,
            records: self.records,
            bytes: self.bytes,
        };

        self.payload.clear();
        self.records = 0;
        self.bytes = self.affix;

        Some(dispatch)
    }

    pub fn records(&self) -> u64 { self.records }

    /// Estimated size of the buffered payload, affixes included.
    pub fn bytes(&self) -> u64 { self.bytes }

    pub fn is_empty(&self) -> bool { self.records == 0 }

    pub fn options(&self) -> &BufferOptions { &self.options }

    fn is_full(&self) -> bool {
        let records_full = self
            .options
            .records_per_request
            .is_some_and(|cap| self.records >= cap);
        let bytes_full = self
            .options
            .bytes_per_request
            .is_some_and(|cap| self.bytes >= cap);
        records_full || bytes_full
    }
}

/// A [`Buffer`] that serializes records with `serde_json` before framing.
#[derive(Debug)]
pub struct JsonBuffer {
    inner: Buffer,
}

impl JsonBuffer {
    pub fn new(options: BufferOptions) -> Self {
        Self {
            inner: Buffer::new(options),
        }
    }

    pub fn push<T: Serialize + ?Sized>(
        &mut self,
        record: &T,
    ) -> Result<Vec<Dispatch>, serde_json::Error> {
        let serialized = serde_json::to_string(record)?;
        Ok(self.inner.push(&serialized))
    }

    pub fn flush(&mut self) -> Option<Dispatch> { self.inner.flush() }

    pub fn records(&self) -> u64 { self.inner.records() }

    pub fn bytes(&self) -> u64 { self.inner.bytes() }

    pub fn is_empty(&self) -> bool { self.inner.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn options(records: Option<u64>, bytes: Option<u64>) -> BufferOptions {
        BufferOptions::default()
            .records_per_request(records)
            .bytes_per_request(bytes)
    }

    #[test]
    fn test_estimate_doubles_utf16_length() {
        assert_eq!(estimate_bytes(""), 0);
        assert_eq!(estimate_bytes("abc"), 6);
        // one BMP char, one astral char (surrogate pair)
        assert_eq!(estimate_bytes("é😀"), 6);
    }

    #[test]
    fn test_empty_buffer_carries_affix_cost() {
        let mut buffer = Buffer::new(options(None, None));
        assert_eq!(buffer.bytes(), 4);
        assert!(buffer.is_empty());
        assert!(buffer.flush().is_none());
    }

    #[test]
    fn test_record_cap_flushes_on_push() {
        let mut buffer = Buffer::new(options(Some(2), None));

        assert!(buffer.push("1").is_empty());
        let flushed = buffer.push("2");

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].payload, "[1,2]");
        assert_eq!(flushed[0].records, 2);
        assert_eq!(flushed[0].bytes, 4 + 2 + 2 + 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_byte_cap_flushes_before_overflow() {
        // affix 4 + "aaaa" 8 = 12; adding ",bbbb" would reach 22 > 16
        let mut buffer = Buffer::new(options(None, Some(16)));

        assert!(buffer.push("aaaa").is_empty());
        let flushed = buffer.push("bbbb");

        assert_eq!(flushed.len(), 1);
        assert_eq!(flushed[0].payload, "[aaaa]");
        assert_eq!(buffer.records(), 1);
        assert_eq!(buffer.flush().unwrap().payload, "[bbbb]");
    }

    #[test]
    fn test_oversized_record_yields_two_dispatches() {
        let mut buffer = Buffer::new(options(None, Some(20)));

        assert!(buffer.push("a").is_empty());
        let flushed = buffer.push("xxxxxxxxxxxxxxxxxxxx");

        assert_eq!(flushed.len(), 2);
        assert_eq!(flushed[0].payload, "[a]");
        assert_eq!(flushed[1].records, 1);
        assert!(flushed[1].bytes > 20);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_custom_framing() {
        let mut buffer = Buffer::new(
            BufferOptions::default()
                .prefix("{\"data\":[")
                .suffix("]}")
                .delimiter(",\n"),
        );
        buffer.push("1");
        buffer.push("2");
        assert_eq!(buffer.flush().unwrap().payload, "{\"data\":[1,\n2]}");
    }

    #[test]
    fn test_json_buffer_serializes_records() {
        let mut buffer = JsonBuffer::new(options(Some(3), None));
        buffer.push(&json!({"id": 1})).unwrap();
        buffer.push(&json!({"id": 2})).unwrap();
        let flushed = buffer.push(&json!({"id": 3})).unwrap();

        assert_eq!(flushed.len(), 1);
        let parsed: serde_json::Value = serde_json::from_str(&flushed[0].payload).unwrap();
        assert_eq!(parsed, json!([{"id": 1}, {"id": 2}, {"id": 3}]));
    }

    proptest! {
        #[test]
        fn prop_dispatches_respect_caps(
            records in proptest::collection::vec("[a-z0-9é]{0,40}", 0..200),
            record_cap in 1u64..20,
            byte_cap in 8u64..400,
        ) {
            let mut buffer = Buffer::new(options(Some(record_cap), Some(byte_cap)));
            let mut dispatches = Vec::new();
            for record in &records {
                dispatches.extend(buffer.push(record));
            }
            dispatches.extend(buffer.flush());

            let total: u64 = dispatches.iter().map(|d| d.records).sum();
            prop_assert_eq!(total, records.len() as u64);

            for dispatch in &dispatches {
                prop_assert!(dispatch.records >= 1);
                prop_assert!(dispatch.records <= record_cap);
                prop_assert!(dispatch.bytes <= byte_cap || dispatch.records == 1);
            }
        }
    }
}
