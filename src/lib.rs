#![allow(clippy::missing_safety_doc)]
#![warn(missing_docs)]
/*!
Bootstrap layer for a Vulkan application: opens a window, loads the Vulkan
runtime, creates an instance and a surface, picks a physical device and
creates a logical device with graphics and present queues.

- ✅ Window + event pump (winit)
- ✅ Instance creation with layer/extension negotiation
- ✅ Physical device selection (first discrete GPU, integrated fallback)
- ✅ Queue family discovery
- ✅ Logical device creation and queue retrieval
- ✅ Teardown in reverse order of creation, enforced by ownership

## Example

```rust,ignore
let config = AppConfig::default().with_title("demo");
let mut app = Application::new(config)?;
app.run();
```

## Device selection policy

Devices are scanned in enumeration order. The first
[`PhysicalDeviceKind::Discrete`] device wins. If there is none, the *last*
[`PhysicalDeviceKind::Integrated`] device seen is used instead. With no
candidate at all, device creation fails with
[`DeviceCreationError::NoSuitableDevice`].
*/

pub mod app;
pub mod config;
pub mod context;
pub mod device;
pub mod error;
pub mod instance;
pub mod surface;
pub mod window;

#[cfg(test)]
pub(crate) mod testing;

pub use app::*;
pub use config::*;
pub use context::*;
pub use device::*;
pub use error::*;
pub use instance::*;
pub use surface::*;
pub use window::*;

type BootstrapSmallVec<T> = smallvec::SmallVec<[T; 8]>;
