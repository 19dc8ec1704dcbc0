use classifier_core::present::{result_message, Presenter, ERROR_TITLE, RESULT_TITLE};
use providers::ClassificationResult;
use std::io::{self, Write};
use std::sync::Mutex;

type Sink = Mutex<Box<dyn Write + Send>>;

/// Human-readable output: result on stdout, errors on stderr.
pub struct TextPresenter {
    out: Sink,
    err: Sink,
    verbose: bool,
}

impl TextPresenter {
    pub fn new(out: Box<dyn Write + Send>, err: Box<dyn Write + Send>, verbose: bool) -> Self {
        Self {
            out: Mutex::new(out),
            err: Mutex::new(err),
            verbose,
        }
    }

    pub fn stdio(verbose: bool) -> Self {
        Self::new(Box::new(io::stdout()), Box::new(io::stderr()), verbose)
    }
}

impl Presenter for TextPresenter {
    fn show_result(&self, result: &ClassificationResult) {
        let Ok(mut out) = self.out.lock() else { return };
        let _ = writeln!(out, "{RESULT_TITLE}\n{}", result_message(result));
        if self.verbose {
            for (label, p) in result.ranked() {
                let _ = writeln!(out, "  {:<16} {:>3}%", label, (p * 100.0).round() as u32);
            }
        }
        let _ = out.flush();
    }

    fn show_error(&self, message: &str) {
        let Ok(mut err) = self.err.lock() else { return };
        let _ = writeln!(err, "{ERROR_TITLE}\n{message}");
        let _ = err.flush();
    }
}

/// One JSON document per submission on stdout.
pub struct JsonPresenter {
    out: Sink,
}

impl JsonPresenter {
    pub fn new(out: Box<dyn Write + Send>) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(io::stdout()))
    }

    fn emit(&self, value: serde_json::Value) {
        let Ok(mut out) = self.out.lock() else { return };
        if let Ok(text) = serde_json::to_string_pretty(&value) {
            let _ = writeln!(out, "{text}");
            let _ = out.flush();
        }
    }
}

pub fn result_json(result: &ClassificationResult) -> serde_json::Value {
    let ranked: Vec<serde_json::Value> = result
        .ranked()
        .into_iter()
        .map(|(label, p)| serde_json::json!({ "label": label, "probability": p }))
        .collect();
    serde_json::json!({
        "status": "ok",
        "class_name": result.class_name,
        "confidence": result.confidence,
        "confidence_percent": result.confidence_percent(),
        "all_probabilities": ranked,
        "classified_at": chrono::Utc::now().to_rfc3339(),
    })
}

impl Presenter for JsonPresenter {
    fn show_result(&self, result: &ClassificationResult) {
        self.emit(result_json(result));
    }

    fn show_error(&self, message: &str) {
        self.emit(serde_json::json!({
            "status": "error",
            "message": message,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuf {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    fn penny() -> ClassificationResult {
        ClassificationResult {
            class_name: "Penny".into(),
            confidence: 0.92,
            all_probabilities: HashMap::from([("Penny".into(), 0.92), ("Nickel".into(), 0.08)]),
        }
    }

    #[test]
    fn text_presenter_prints_label_and_percentage() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let presenter = TextPresenter::new(Box::new(out.clone()), Box::new(err.clone()), true);
        presenter.show_result(&penny());
        let text = out.text();
        assert!(text.starts_with("Classification Result\nDetected: Penny\nConfidence: 92%\n"));
        assert!(text.contains("Nickel"));
        assert!(err.text().is_empty());
    }

    #[test]
    fn text_presenter_routes_errors_to_stderr() {
        let out = SharedBuf::default();
        let err = SharedBuf::default();
        let presenter = TextPresenter::new(Box::new(out.clone()), Box::new(err.clone()), false);
        presenter.show_error("Classification failed: Model unavailable");
        assert!(out.text().is_empty());
        assert_eq!(err.text(), "Error\nClassification failed: Model unavailable\n");
    }

    #[test]
    fn json_presenter_emits_ranked_probabilities() {
        let out = SharedBuf::default();
        JsonPresenter::new(Box::new(out.clone())).show_result(&penny());
        let value: serde_json::Value = serde_json::from_str(&out.text()).unwrap();
        assert_eq!(value["status"], "ok");
        assert_eq!(value["class_name"], "Penny");
        assert_eq!(value["confidence_percent"], 92);
        assert_eq!(value["all_probabilities"][0]["label"], "Penny");
    }

    #[test]
    fn result_json_keeps_service_values_exact() {
        let value = result_json(&penny());
        assert_eq!(value["confidence"], 0.92);
        assert_eq!(value["all_probabilities"][0]["probability"], 0.92);
        assert_eq!(value["all_probabilities"][1]["probability"], 0.08);
        assert_eq!(value["confidence"].to_string(), "0.92");
    }
}
