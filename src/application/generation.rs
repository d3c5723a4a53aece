use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::domain::generation::GenerationReport;

use super::{
    classifier::{ClassificationError, Classifier},
    orchestrator::Orchestrator,
};

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("content must not be empty")]
    EmptyContent,
    #[error(transparent)]
    Classification(#[from] ClassificationError),
}

/// One request end to end: classify the content, then orchestrate the tasks.
#[derive(Clone)]
pub struct GenerationService {
    classifier: Arc<dyn Classifier>,
    orchestrator: Orchestrator,
}

impl GenerationService {
    pub fn new(classifier: Arc<dyn Classifier>, orchestrator: Orchestrator) -> Self {
        Self {
            classifier,
            orchestrator,
        }
    }

    pub async fn generate(&self, content: &str) -> Result<GenerationReport, GenerationError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(GenerationError::EmptyContent);
        }

        let tasks = self.classifier.classify(content).await?;
        info!(
            target = "courseviz::generation",
            tasks = tasks.len(),
            content_chars = content.chars().count(),
            "request classified"
        );
        Ok(self.orchestrator.run(tasks).await)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::{
        application::{classifier::UnavailableClassifier, registry::StrategyRegistry},
        domain::task::Task,
    };

    struct NoTasks;

    #[async_trait]
    impl Classifier for NoTasks {
        async fn classify(&self, _content: &str) -> Result<Vec<Task>, ClassificationError> {
            Ok(Vec::new())
        }
    }

    fn service(classifier: Arc<dyn Classifier>) -> GenerationService {
        GenerationService::new(
            classifier,
            Orchestrator::new(Arc::new(StrategyRegistry::new()), 15),
        )
    }

    #[tokio::test]
    async fn blank_content_is_rejected_before_classification() {
        let err = service(Arc::new(NoTasks))
            .generate("   ")
            .await
            .expect_err("empty");
        assert!(matches!(err, GenerationError::EmptyContent));
    }

    #[tokio::test]
    async fn classification_failures_are_fatal_to_the_request() {
        let err = service(Arc::new(UnavailableClassifier::new("no key")))
            .generate("Explain photosynthesis")
            .await
            .expect_err("classification");
        assert!(matches!(
            err,
            GenerationError::Classification(ClassificationError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn empty_task_lists_produce_empty_reports() {
        let report = service(Arc::new(NoTasks))
            .generate("Nothing visual here")
            .await
            .expect("report");
        assert_eq!(report.metadata.total, 0);
    }
}
