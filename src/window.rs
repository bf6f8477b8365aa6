//! Native window and event pump.
use std::panic::{self, UnwindSafe};

use raw_window_handle::{
    HasRawDisplayHandle, HasRawWindowHandle, RawDisplayHandle, RawWindowHandle,
};
use winit::{
    dpi::LogicalSize,
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    platform::run_return::EventLoopExtRunReturn,
    window::WindowBuilder,
};

use crate::{AppConfig, Error};

/// A native window together with the event loop that drives it. The window
/// is destroyed when this is dropped.
pub struct Window {
    window: winit::window::Window,
    event_loop: EventLoop<()>,
}

impl Window {
    /// Open a window titled and sized from `config`.
    pub fn new(config: &AppConfig) -> Result<Self, Error> {
        let event_loop = catch_init("initialize windowing", EventLoop::new)?;
        let window = WindowBuilder::new()
            .with_title(config.title.as_str())
            .with_inner_size(LogicalSize::new(config.width, config.height))
            .build(&event_loop)
            .map_err(|err| Error::Initialization(format!("failed to create window: {err}")))?;

        log::debug!(
            "created window {:?} ({}x{})",
            config.title,
            config.width,
            config.height
        );

        Ok(Window { window, event_loop })
    }

    /// The underlying winit window.
    #[inline]
    pub fn inner(&self) -> &winit::window::Window {
        &self.window
    }

    /// Busy-polls events until the window is asked to close. Nothing else is
    /// done per iteration.
    pub fn pump_until_close(&mut self) {
        let id = self.window.id();
        self.event_loop.run_return(|event, _, control_flow| {
            *control_flow = ControlFlow::Poll;

            if let Event::WindowEvent {
                event: WindowEvent::CloseRequested,
                window_id,
            } = event
            {
                if window_id == id {
                    log::info!("quit requested");
                    *control_flow = ControlFlow::Exit;
                }
            }
        });
    }
}

/// Runs a window system call that reports failure by panicking, and turns the
/// panic into [`Error::Initialization`].
fn catch_init<T>(what: &str, init: impl FnOnce() -> T + UnwindSafe) -> Result<T, Error> {
    panic::catch_unwind(init).map_err(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|reason| reason.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown error".to_owned());
        Error::Initialization(format!("failed to {what}: {reason}"))
    })
}

unsafe impl HasRawDisplayHandle for Window {
    fn raw_display_handle(&self) -> RawDisplayHandle {
        self.window.raw_display_handle()
    }
}

unsafe impl HasRawWindowHandle for Window {
    fn raw_window_handle(&self) -> RawWindowHandle {
        self.window.raw_window_handle()
    }
}

impl Drop for Window {
    fn drop(&mut self) {
        log::debug!("destroying window");
    }
}
