use crate::error::InferenceError;
use ndarray::ArrayD;
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::DynValue,
};
use std::{
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Several ONNX sessions over the same model, handed out round-robin.
#[derive(Clone)]
pub struct SessionPool {
    sessions: Arc<Vec<Arc<Mutex<Session>>>>,
    counter: Arc<AtomicUsize>,
}

impl SessionPool {
    pub fn new(model_path: &Path, num_instances: usize) -> Result<Self, InferenceError> {
        let num_instances = num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(model_path)?;
                Ok(Arc::new(Mutex::new(session)))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!("Created {} ONNX sessions for {:?}", num_instances, model_path);

        Ok(Self {
            sessions: Arc::new(sessions),
            counter: Arc::new(AtomicUsize::new(0)),
        })
    }

    pub fn with_session<T>(
        &self,
        f: impl FnOnce(&mut Session) -> Result<T, InferenceError>,
    ) -> Result<T, InferenceError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|_| InferenceError::SessionPoisoned)?;

        tracing::debug!("Handling request with session {}", index);
        f(&mut *session)
    }
}

/// Copies an `f32` output tensor out of the session's buffers.
pub(crate) fn to_array(value: &DynValue) -> Result<ArrayD<f32>, InferenceError> {
    let (shape, data) = value.try_extract_tensor::<f32>()?;
    let array = ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())?;
    Ok(array)
}

/// Logits of the final sequence position from a `[batch, seq, vocab]` output.
pub(crate) fn last_position_logits(value: &DynValue) -> Result<Vec<f32>, InferenceError> {
    let (shape, data) = value.try_extract_tensor::<f32>()?;
    if shape.len() != 3 || shape[1] < 1 {
        return Err(InferenceError::UnexpectedOutput(format!(
            "expected [batch, seq, vocab] logits, got {:?}",
            shape
        )));
    }

    let seq_len = shape[1] as usize;
    let vocab = shape[2] as usize;
    let start = (seq_len - 1) * vocab;
    data.get(start..start + vocab)
        .map(|row| row.to_vec())
        .ok_or_else(|| InferenceError::UnexpectedOutput("logits buffer too short".into()))
}
