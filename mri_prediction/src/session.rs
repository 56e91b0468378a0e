use crate::error::PredictionError;
use ndarray::{Array, ArrayD, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

/// A fixed set of ONNX sessions over one model file, built once and handed out round-robin.
///
/// Running a session needs exclusive access, so each one sits behind its own mutex and
/// concurrent requests spread over the pool instead of queueing on a single session.
pub struct SessionPool {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    path: PathBuf,
    input_names: Vec<String>,
    output_names: Vec<String>,
}

impl SessionPool {
    pub fn load(path: &Path, num_instances: usize) -> Result<Self, PredictionError> {
        let load_error = |message: String| PredictionError::ModelLoad {
            path: path.to_path_buf(),
            message,
        };

        let num_instances = num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(path)?;
                Ok(session)
            })
            .collect::<Result<Vec<_>, ort::Error>>()
            .map_err(|e| load_error(e.to_string()))?;

        let first = sessions
            .first()
            .ok_or_else(|| load_error("no session created".to_string()))?;
        let input_names: Vec<String> = first.inputs.iter().map(|i| i.name.clone()).collect();
        let output_names: Vec<String> = first.outputs.iter().map(|o| o.name.clone()).collect();

        tracing::info!(
            "Created {} ONNX sessions for {:?} (inputs {:?}, outputs {:?})",
            num_instances,
            path,
            input_names,
            output_names
        );

        Ok(Self {
            sessions: sessions.into_iter().map(Mutex::new).collect(),
            counter: AtomicUsize::new(0),
            path: path.to_path_buf(),
            input_names,
            output_names,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Picks the configured input name, or the first one the graph declares.
    pub fn resolve_input(&self, configured: Option<&str>) -> Result<String, PredictionError> {
        resolve_name(&self.path, "input", &self.input_names, configured)
    }

    /// Picks the configured output name, or the first one the graph declares.
    pub fn resolve_output(&self, configured: Option<&str>) -> Result<String, PredictionError> {
        resolve_name(&self.path, "output", &self.output_names, configured)
    }

    pub fn run(
        &self,
        input_name: &str,
        input: &Array<f32, Ix4>,
        output_names: &[&str],
    ) -> Result<Vec<ArrayD<f32>>, PredictionError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| PredictionError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {} of {:?}", index, self.path);
        let owned_buffer;
        let input_view = if input.view().is_standard_layout() {
            input.view()
        } else {
            owned_buffer = input.as_standard_layout().into_owned();
            owned_buffer.view()
        };

        let tensor_ref = TensorRef::from_array_view(input_view)
            .map_err(|e| PredictionError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![input_name => tensor_ref])
            .map_err(|e| PredictionError::Inference(e.to_string()))?;

        output_names
            .iter()
            .map(|name| {
                let (shape, data) = outputs[*name].try_extract_tensor::<f32>().map_err(|e| {
                    PredictionError::InvalidOutput(format!(
                        "failed to extract tensor {}: {}",
                        name, e
                    ))
                })?;

                ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec()).map_err(|e| {
                    PredictionError::InvalidOutput(format!(
                        "invalid shape for tensor {}: {}",
                        name, e
                    ))
                })
            })
            .collect()
    }
}

fn resolve_name(
    path: &Path,
    role: &str,
    declared: &[String],
    configured: Option<&str>,
) -> Result<String, PredictionError> {
    match configured {
        Some(name) if declared.iter().any(|d| d == name) => Ok(name.to_string()),
        Some(name) => Err(PredictionError::ModelLoad {
            path: path.to_path_buf(),
            message: format!(
                "graph declares no {} named {} (found {:?})",
                role, name, declared
            ),
        }),
        None => declared
            .first()
            .cloned()
            .ok_or_else(|| PredictionError::ModelLoad {
                path: path.to_path_buf(),
                message: format!("graph declares no {}", role),
            }),
    }
}
