//! Camera control and autofocus
//!
//! - External-process command runner with bounded waits
//! - gphoto2 camera: property access, config catalogue, bulb exposures
//! - Frame helpers and the Vollath F4 focus metric
//! - Coarse/fine autofocus engine with a Lorentzian peak fit

pub mod autofocus;
pub mod error;
pub mod fit;
pub mod gphoto;
pub mod image;
pub mod runner;

pub use autofocus::{
    select_best_focus, sweep_positions, Autofocus, AutofocusEvent, AutofocusHandle, AutofocusRequest, Camera,
    EventSink, FocusPlot, FocusPlotWriter, FocusRunResult, FocusSample, FocusSelection, FocuserDevice, FrameStore,
};
pub use error::{CameraError, CameraResult};
pub use fit::{fit_lorentzian, fit_peak, parabola_vertex, PeakEstimate, PeakFit};
pub use gphoto::{parse_config, parse_current, CameraProperty, GphotoCamera, GphotoConfig};
pub use image::{ImageFrame, SharpnessAxis};
pub use runner::{CommandPort, ProcessRunner};
