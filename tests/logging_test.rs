//! Rule-set load failures are reported through `tracing`

use std::io;
use std::sync::{Arc, Mutex};

use msgmap::{extract_flat_xml, extract_xml, map_and_render, FieldDictionary, TransformRegistry};
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

struct BufferWriter(Arc<Mutex<Vec<u8>>>);

impl<'a> MakeWriter<'a> for SharedBuffer {
    type Writer = BufferWriter;

    fn make_writer(&'a self) -> Self::Writer {
        BufferWriter(Arc::clone(&self.0))
    }
}

impl io::Write for BufferWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .0
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "lock poisoned"))?;
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn captured_warnings(run: impl FnOnce()) -> Vec<String> {
    let sink = SharedBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(sink.clone())
        .with_ansi(false)
        .with_max_level(Level::WARN)
        .finish();

    tracing::subscriber::with_default(subscriber, run);

    let bytes = sink.0.lock().expect("lock output").clone();
    String::from_utf8(bytes)
        .expect("utf8 log output")
        .lines()
        .filter(|l| l.contains("WARN"))
        .map(str::to_string)
        .collect()
}

#[test]
fn test_malformed_extraction_rules_are_logged() {
    let lines = captured_warnings(|| {
        let registry = TransformRegistry::with_builtins();
        assert!(extract_xml("<A/>", "{not json", &registry).is_err());
    });

    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].contains("failed to load extraction rule set"));
}

#[test]
fn test_malformed_mapping_rules_are_logged() {
    let lines = captured_warnings(|| {
        let registry = TransformRegistry::with_builtins();
        assert!(map_and_render(&FieldDictionary::new(), "[1, 2]", "@@A@@", &registry).is_err());
    });

    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].contains("failed to load mapping rule set"));
}

#[test]
fn test_malformed_converter_rules_are_logged() {
    let lines = captured_warnings(|| {
        assert!(extract_flat_xml("<A/>", "nope").is_err());
    });

    assert_eq!(lines.len(), 1, "{lines:?}");
    assert!(lines[0].contains("failed to load converter extraction rules"));
}

#[test]
fn test_valid_rules_log_nothing() {
    let lines = captured_warnings(|| {
        let registry = TransformRegistry::with_builtins();
        let fields = extract_xml("<A>1</A>", r#"{"a": "//A"}"#, &registry).unwrap();
        assert_eq!(fields["a"], "1");
    });

    assert!(lines.is_empty(), "{lines:?}");
}
