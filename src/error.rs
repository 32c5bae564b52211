use ash::vk;
use std::path::PathBuf;

/// Everything the renderer can fail with. Any of these reaching the frame
/// loop is fatal: the GPU context is not trusted after a failed call.
#[derive(Debug, thiserror::Error)]
pub enum RendererError {
    #[error("{op} failed: {result:?}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("Failed to load Vulkan: {0}")]
    Loader(#[from] ash::LoadingError),

    #[error("No suitable GPU: {0}")]
    NoSuitableDevice(String),

    #[error("Failed to read shader {path}: {source}")]
    Shader {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Window error: {0}")]
    Window(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, RendererError>;

/// Tags a raw `vk::Result` with the call that produced it.
pub trait VkResultExt<T> {
    fn op(self, op: &'static str) -> Result<T>;
}

impl<T> VkResultExt<T> for std::result::Result<T, vk::Result> {
    fn op(self, op: &'static str) -> Result<T> {
        self.map_err(|result| RendererError::Vulkan { op, result })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vulkan_error_names_operation() {
        let err: Result<()> = Err(vk::Result::ERROR_DEVICE_LOST).op("vkQueueSubmit");
        let msg = err.unwrap_err().to_string();
        assert!(msg.contains("vkQueueSubmit"));
        assert!(msg.contains("ERROR_DEVICE_LOST"));
    }

    #[test]
    fn test_ok_passes_through() {
        let ok: std::result::Result<u32, vk::Result> = Ok(7);
        assert_eq!(ok.op("noop").unwrap(), 7);
    }
}
