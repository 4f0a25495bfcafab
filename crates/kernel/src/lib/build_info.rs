//! Build metadata stamped in by `build.rs`, printed at boot and in panic banners.

pub const GIT_HASH: &str = env!("PMKERNEL_GIT_HASH");
