//! Model loading for ONNX Runtime
//!
//! Wraps the detector session, picks the execution provider, and exposes
//! inference through the `InferenceBackend` trait.

use ndarray::Array4;
use ort::execution_providers::{CUDAExecutionProvider, ExecutionProvider, ExecutionProviderDispatch};
use ort::session::{builder::GraphOptimizationLevel, builder::SessionBuilder, Session};
use ort::value::Tensor;
use std::path::Path;
use tracing::{debug, info, warn};

use super::error::DetectorError;

/// Raw output tensor of a model run
#[derive(Debug, Clone)]
pub struct ModelOutput {
    /// Tensor shape, e.g. [1, 14, 8400]
    pub shape: Vec<i64>,
    /// Row-major tensor data
    pub data: Vec<f32>,
}

/// Anything that can run the detector network on a preprocessed NCHW tensor
pub trait InferenceBackend: Send {
    /// Expected input (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Run one forward pass
    fn run(&mut self, input: Array4<f32>) -> Result<ModelOutput, DetectorError>;
}

/// Execution providers in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionBackend {
    Cuda,
    DirectMl,
    CoreMl,
    Cpu,
}

impl ExecutionBackend {
    /// Display name for logging
    pub fn name(&self) -> &'static str {
        match self {
            ExecutionBackend::Cuda => "CUDA",
            ExecutionBackend::DirectMl => "DirectML",
            ExecutionBackend::CoreMl => "CoreML",
            ExecutionBackend::Cpu => "CPU",
        }
    }

    /// Hardware providers to try on this platform, best first. CPU is always the fallback.
    pub fn platform_priority() -> &'static [ExecutionBackend] {
        if cfg!(target_os = "windows") {
            &[ExecutionBackend::Cuda, ExecutionBackend::DirectMl]
        } else if cfg!(target_os = "macos") {
            &[ExecutionBackend::CoreMl]
        } else {
            &[ExecutionBackend::Cuda]
        }
    }

    /// Provider registration, `None` when the provider is not usable here
    fn provider(&self) -> Option<ExecutionProviderDispatch> {
        match self {
            ExecutionBackend::Cuda => {
                let ep = CUDAExecutionProvider::default();
                ep.is_available().unwrap_or(false).then(|| ep.build())
            }
            ExecutionBackend::DirectMl => directml_provider(),
            ExecutionBackend::CoreMl => coreml_provider(),
            ExecutionBackend::Cpu => None,
        }
    }
}

#[cfg(target_os = "windows")]
fn directml_provider() -> Option<ExecutionProviderDispatch> {
    use ort::execution_providers::DirectMLExecutionProvider;
    let ep = DirectMLExecutionProvider::default();
    ep.is_available().unwrap_or(false).then(|| ep.build())
}

#[cfg(not(target_os = "windows"))]
fn directml_provider() -> Option<ExecutionProviderDispatch> {
    None
}

#[cfg(target_os = "macos")]
fn coreml_provider() -> Option<ExecutionProviderDispatch> {
    use ort::execution_providers::CoreMLExecutionProvider;
    let ep = CoreMLExecutionProvider::default();
    ep.is_available().unwrap_or(false).then(|| ep.build())
}

#[cfg(not(target_os = "macos"))]
fn coreml_provider() -> Option<ExecutionProviderDispatch> {
    None
}

/// ONNX Runtime session wrapper
pub struct OnnxSession {
    session: Session,
    input_name: String,
    output_name: String,
    input_size: (u32, u32),
}

impl OnnxSession {
    /// Load a model, trying hardware providers first when `use_gpu` is set.
    ///
    /// `fallback_size` is used when the model declares dynamic input dimensions.
    pub fn new(
        model_path: &Path,
        use_gpu: bool,
        intra_threads: usize,
        fallback_size: (u32, u32),
    ) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelMissing(model_path.to_path_buf()));
        }

        info!("Loading ONNX model from {:?}", model_path);

        let load_err = |source: ort::Error| DetectorError::ModelLoad {
            path: model_path.to_path_buf(),
            source,
        };

        let mut builder = base_builder(intra_threads).map_err(load_err)?;
        let mut backend = ExecutionBackend::Cpu;

        if use_gpu {
            for candidate in ExecutionBackend::platform_priority() {
                let Some(provider) = candidate.provider() else {
                    debug!("{} execution provider not available", candidate.name());
                    continue;
                };

                match builder.with_execution_providers([provider]) {
                    Ok(b) => {
                        builder = b;
                        backend = *candidate;
                        break;
                    }
                    Err(e) => {
                        warn!("{} registration failed, trying next provider: {}", candidate.name(), e);
                        builder = base_builder(intra_threads).map_err(load_err)?;
                    }
                }
            }

            if backend == ExecutionBackend::Cpu {
                warn!("No GPU execution provider available, detection runs on CPU");
            }
        }

        let session = builder.commit_from_file(model_path).map_err(load_err)?;

        let input_name = session
            .inputs
            .first()
            .map(|input| input.name.clone())
            .unwrap_or_else(|| "images".to_string());

        let output_name = session
            .outputs
            .first()
            .map(|output| output.name.clone())
            .unwrap_or_else(|| "output0".to_string());

        let input_size = session
            .inputs
            .first()
            .and_then(|input| input.input_type.tensor_shape().map(|s| s.to_vec()))
            .and_then(|shape| match shape.as_slice() {
                [_, _, h, w] if *h > 0 && *w > 0 => Some((*w as u32, *h as u32)),
                _ => None,
            })
            .unwrap_or(fallback_size);

        info!(
            "Model loaded on {}. Input: {} {:?}, Output: {}",
            backend.name(),
            input_name,
            input_size,
            output_name
        );

        Ok(Self {
            session,
            input_name,
            output_name,
            input_size,
        })
    }
}

impl InferenceBackend for OnnxSession {
    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn run(&mut self, input: Array4<f32>) -> Result<ModelOutput, DetectorError> {
        let tensor = Tensor::from_array(input)?;
        let outputs = self
            .session
            .run(vec![(self.input_name.as_str(), tensor)])?;

        let (shape, data) = outputs[self.output_name.as_str()].try_extract_tensor::<f32>()?;

        Ok(ModelOutput {
            shape: shape.to_vec(),
            data: data.to_vec(),
        })
    }
}

fn base_builder(intra_threads: usize) -> ort::Result<SessionBuilder> {
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_is_reported() {
        let result = OnnxSession::new(Path::new("/nonexistent/model.onnx"), false, 1, (640, 640));
        assert!(matches!(result, Err(DetectorError::ModelMissing(_))));
    }

    #[test]
    fn test_platform_priority_never_lists_cpu() {
        assert!(!ExecutionBackend::platform_priority().contains(&ExecutionBackend::Cpu));
        assert!(!ExecutionBackend::platform_priority().is_empty());
    }
}
