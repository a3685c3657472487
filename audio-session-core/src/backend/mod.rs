use std::sync::Arc;

use crate::scheduling::dispatcher::Dispatcher;
use crate::scheduling::timer::Timer;
use crate::traits::capture_device::CaptureDevice;
use crate::traits::output_device::OutputDevice;
use crate::traits::platform::{Haptics, PermissionPrompt};
use crate::traits::session_hardware::AudioSessionHardware;
use crate::traits::speech::SpeechSynthesizer;

pub mod simulated;

/// Everything the manager needs from the platform.
#[derive(Clone)]
pub struct AudioBackend {
    pub session: Arc<dyn AudioSessionHardware>,
    pub capture: Arc<dyn CaptureDevice>,
    pub output: Arc<dyn OutputDevice>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub haptics: Arc<dyn Haptics>,
    pub permissions: Arc<dyn PermissionPrompt>,
    /// The designated execution context.
    pub dispatcher: Arc<dyn Dispatcher>,
    pub timer: Arc<dyn Timer>,
}
