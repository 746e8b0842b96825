use std::io::Write;

use async_trait::async_trait;
use serde_json::{Map, Value};

use lode_worker::{OutputSink, Record, WorkerError, WorkerResult};

/// Writes records to stdout, one per line.
///
/// With a blob path field, each record is decoded as JSON and written as
/// one object per event: an object gets the field added, an array yields
/// one event per element, and anything else is wrapped as `message`.
pub struct StdoutSink {
    blob_path_field: Option<String>,
}

impl StdoutSink {
    pub fn new(blob_path_field: Option<&str>) -> Self {
        Self {
            blob_path_field: blob_path_field.map(str::to_string),
        }
    }

    pub fn render(&self, record: &Record) -> WorkerResult<Vec<u8>> {
        let Some(field) = &self.blob_path_field else {
            let mut out = record.content.to_vec();
            if !out.ends_with(b"\n") {
                out.push(b'\n');
            }
            return Ok(out);
        };

        let events = match serde_json::from_slice::<Value>(&record.content) {
            Ok(Value::Array(values)) => values,
            Ok(value) => vec![value],
            Err(_) => vec![Value::String(
                String::from_utf8_lossy(&record.content).into_owned(),
            )],
        };
        let mut out = Vec::new();
        for event in events {
            let mut object = match event {
                Value::Object(map) => map,
                other => {
                    let mut map = Map::new();
                    map.insert("message".into(), other);
                    map
                }
            };
            object.insert(field.clone(), Value::String(record.blob.clone()));
            serde_json::to_writer(&mut out, &Value::Object(object))
                .map_err(|e| WorkerError::Sink(e.to_string()))?;
            out.push(b'\n');
        }
        Ok(out)
    }
}

#[async_trait]
impl OutputSink for StdoutSink {
    async fn emit(&self, record: Record) -> WorkerResult<()> {
        let bytes = self.render(&record)?;
        let mut stdout = std::io::stdout().lock();
        stdout
            .write_all(&bytes)
            .map_err(|e| WorkerError::Sink(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(blob: &str, content: &'static [u8]) -> Record {
        Record {
            blob: blob.into(),
            content: content.into(),
        }
    }

    fn lines(bytes: Vec<u8>) -> Vec<Value> {
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn plain_records_are_newline_terminated() {
        let sink = StdoutSink::new(None);
        assert_eq!(sink.render(&record("a", b"line")).unwrap(), b"line\n");
        assert_eq!(sink.render(&record("a", b"line\n")).unwrap(), b"line\n");
    }

    #[test]
    fn objects_get_blob_path() {
        let sink = StdoutSink::new(Some("azureblobfilepath"));
        let out = lines(sink.render(&record("logs/a.json", br#"{"x":1}"#)).unwrap());
        assert_eq!(out, vec![serde_json::json!({"x": 1, "azureblobfilepath": "logs/a.json"})]);
    }

    #[test]
    fn framed_arrays_yield_one_event_per_element() {
        let sink = StdoutSink::new(Some("path"));
        let out = lines(sink.render(&record("b", br#"[{"x":1},{"x":2}]"#)).unwrap());
        assert_eq!(out.len(), 2);
        assert_eq!(out[1]["x"], 2);
        assert_eq!(out[1]["path"], "b");
    }

    #[test]
    fn non_json_is_wrapped_as_message() {
        let sink = StdoutSink::new(Some("path"));
        let out = lines(sink.render(&record("raw.log", b"plain text")).unwrap());
        assert_eq!(out, vec![serde_json::json!({"message": "plain text", "path": "raw.log"})]);
    }
}
