use providers::ClassificationResult;

/// Renders the outcome of a submission. Called at most once per submission.
pub trait Presenter: Send + Sync {
    fn show_result(&self, result: &ClassificationResult);
    fn show_error(&self, message: &str);
}

pub const RESULT_TITLE: &str = "Classification Result";
pub const ERROR_TITLE: &str = "Error";

pub fn result_message(result: &ClassificationResult) -> String {
    result.to_string()
}
