use serde::Serialize;
use spectacles_model::recommender::RecommendError;
use spectacles_model::{FaceMetrics, Recommendation, Recommender};
use spectacles_vision::{AnalyzerError, FaceAnalyzer, MeshSource};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Analyzer(#[from] AnalyzerError),
    #[error(transparent)]
    Recommend(#[from] RecommendError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Metrics for the uploaded face and the frames ranked for it.
#[derive(Debug, Clone, Serialize)]
pub struct RecommendResult {
    pub metrics: FaceMetrics,
    pub recommendations: Vec<Recommendation>,
}

/// What the engine loaded at startup.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub frames: usize,
    pub features: usize,
    pub trees: usize,
    pub train_rows: usize,
    pub test_r2: f64,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Recommend {
        image: Vec<u8>,
        top_k: usize,
        reply: oneshot::Sender<Result<RecommendResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    status: EngineStatus,
}

impl EngineHandle {
    /// Analyze an encoded photo and rank the catalog for the face in it.
    pub async fn recommend(
        &self,
        image: Vec<u8>,
        top_k: usize,
    ) -> Result<RecommendResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Recommend {
                image,
                top_k,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub fn status(&self) -> &EngineStatus {
        &self.status
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The thread owns the analyzer and recommender and serves one request at
/// a time; it exits when every handle has been dropped.
pub fn spawn_engine<S>(
    mut analyzer: FaceAnalyzer<S>,
    recommender: Recommender,
) -> Result<EngineHandle, EngineError>
where
    S: MeshSource + Send + 'static,
{
    let status = EngineStatus {
        frames: recommender.catalog().len(),
        features: recommender.schema().len(),
        trees: recommender.model().forest.trees().len(),
        train_rows: recommender.model().train_rows,
        test_r2: recommender.model().test_r2,
    };

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("spectacles-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Recommend { image, top_k, reply } => {
                        let result = run_recommend(&mut analyzer, &recommender, &image, top_k);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, status })
}

fn run_recommend<S: MeshSource>(
    analyzer: &mut FaceAnalyzer<S>,
    recommender: &Recommender,
    image: &[u8],
    top_k: usize,
) -> Result<RecommendResult, EngineError> {
    let metrics = analyzer.analyze_bytes(image)?;
    let recommendations = recommender.recommend(&metrics, top_k)?;
    tracing::info!(
        bytes = image.len(),
        top_k,
        returned = recommendations.len(),
        best = recommendations.first().map(|r| r.frame.frame_id.as_str()),
        "recommendation served"
    );
    Ok(RecommendResult {
        metrics,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{png, recommender, StubSource};

    #[tokio::test]
    async fn test_recommend_roundtrip() {
        let engine = spawn_engine(FaceAnalyzer::new(StubSource::face()), recommender()).unwrap();
        assert_eq!(engine.status().frames, 3);

        let result = engine.recommend(png(), 2).await.unwrap();
        assert_eq!(result.metrics.len(), 6);
        assert_eq!(result.recommendations.len(), 2);
        assert!(result.recommendations[0].score >= result.recommendations[1].score);
    }

    #[tokio::test]
    async fn test_no_face_propagates() {
        let engine = spawn_engine(FaceAnalyzer::new(StubSource::no_face()), recommender()).unwrap();
        let err = engine.recommend(png(), 2).await.unwrap_err();
        assert!(matches!(err, EngineError::Analyzer(AnalyzerError::NoFaceDetected)));
    }

    #[tokio::test]
    async fn test_concurrent_handles_serialized() {
        let engine = spawn_engine(FaceAnalyzer::new(StubSource::face()), recommender()).unwrap();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.recommend(png(), 3).await })
            })
            .collect();
        let mut outputs = Vec::new();
        for task in tasks {
            outputs.push(task.await.unwrap().unwrap().recommendations);
        }
        assert!(outputs.windows(2).all(|w| w[0] == w[1]));
    }
}
