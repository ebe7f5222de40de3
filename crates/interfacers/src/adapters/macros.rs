//! Adapter macros

/// Implement [`Channels`](crate::adapters::common::Channels) for settings
/// structs carrying `pubchannels` and `subchannels` fields
///
/// # Usage
/// ```ignore
/// impl_channels!(CommandSettings, SocketSettings);
/// ```
macro_rules! impl_channels {
    ($($settings:ty),+ $(,)?) => {
        $(
            impl $crate::adapters::common::Channels for $settings {
                fn pubchannels(&self) -> &[String] {
                    &self.pubchannels
                }

                fn subchannels(&self) -> &[String] {
                    &self.subchannels
                }
            }
        )+
    };
}
