// Target builds log over defmt; host builds (tests, `std` feature) go through the
// `log` crate so the same call sites work in both.
#[allow(unused)]
pub mod log {
    #[cfg(not(any(test, feature = "std")))]
    pub use defmt::{debug, error, info, trace, warn};

    #[cfg(any(test, feature = "std"))]
    pub use ::log::{debug, error, info, trace, warn};
}
