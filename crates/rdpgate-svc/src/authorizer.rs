//! Channel authorization policy.
//!
//! The authorizer is a pure lookup over an immutable policy snapshot built
//! once per session; queries have no side effects and never fail.

/// How channel names that match neither pattern list are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlistedPolicy {
    DenyUnlisted,
    AllowUnlisted,
}

/// Device classes announced on the rdpdr channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceClass {
    Drive,
    Printer,
    Port,
    Smartcard,
}

/// Immutable channel policy snapshot.
///
/// Static and dynamic channel names are matched against glob-style pattern
/// lists where `*` matches any run of characters and `?` matches exactly
/// one. Matching is case-insensitive ASCII, and a deny match takes
/// precedence over an allow match.
#[derive(Debug, Clone)]
pub struct ChannelAuthorizer {
    allowed: Vec<String>,
    denied: Vec<String>,
    dynamic_allowed: Vec<String>,
    dynamic_denied: Vec<String>,
    unlisted: UnlistedPolicy,
    clipboard_up: bool,
    clipboard_down: bool,
    clipboard_file_transfer: bool,
    drive: bool,
    printer: bool,
    port: bool,
    smartcard: bool,
}

impl ChannelAuthorizer {
    /// Creates an empty policy; every sub-capability starts denied and only
    /// `unlisted` decides the fate of unmatched names.
    pub fn new(unlisted: UnlistedPolicy) -> Self {
        Self {
            allowed: Vec::new(),
            denied: Vec::new(),
            dynamic_allowed: Vec::new(),
            dynamic_denied: Vec::new(),
            unlisted,
            clipboard_up: false,
            clipboard_down: false,
            clipboard_file_transfer: false,
            drive: false,
            printer: false,
            port: false,
            smartcard: false,
        }
    }

    #[must_use]
    pub fn allow_channels<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn deny_channels<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.denied.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn allow_dynamic_channels<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dynamic_allowed.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn deny_dynamic_channels<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dynamic_denied.extend(patterns.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn with_clipboard(mut self, up: bool, down: bool, file_transfer: bool) -> Self {
        self.clipboard_up = up;
        self.clipboard_down = down;
        self.clipboard_file_transfer = file_transfer;
        self
    }

    #[must_use]
    pub fn allow_device_class(mut self, class: DeviceClass) -> Self {
        match class {
            DeviceClass::Drive => self.drive = true,
            DeviceClass::Printer => self.printer = true,
            DeviceClass::Port => self.port = true,
            DeviceClass::Smartcard => self.smartcard = true,
        }
        self
    }

    /// Decides whether a static virtual channel may be joined and routed.
    pub fn is_authorized(&self, name: &str) -> bool {
        self.decide(&self.denied, &self.allowed, name)
    }

    /// Decides whether a drdynvc channel creation may be forwarded.
    pub fn is_dynamic_channel_authorized(&self, name: &str) -> bool {
        self.decide(&self.dynamic_denied, &self.dynamic_allowed, name)
    }

    pub fn is_clipboard_up_authorized(&self) -> bool {
        self.clipboard_up
    }

    pub fn is_clipboard_down_authorized(&self) -> bool {
        self.clipboard_down
    }

    pub fn is_clipboard_file_transfer_authorized(&self) -> bool {
        self.clipboard_file_transfer
    }

    pub fn is_device_class_authorized(&self, class: DeviceClass) -> bool {
        match class {
            DeviceClass::Drive => self.drive,
            DeviceClass::Printer => self.printer,
            DeviceClass::Port => self.port,
            DeviceClass::Smartcard => self.smartcard,
        }
    }

    fn decide(&self, denied: &[String], allowed: &[String], name: &str) -> bool {
        if matches_any(denied, name) {
            return false;
        }

        if matches_any(allowed, name) {
            return true;
        }

        matches!(self.unlisted, UnlistedPolicy::AllowUnlisted)
    }
}

fn matches_any(patterns: &[String], name: &str) -> bool {
    patterns
        .iter()
        .any(|pattern| glob_match(pattern.as_bytes(), name.as_bytes()))
}

// Case-insensitive ASCII glob over `*` and `?`.
fn glob_match(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.split_first(), name.split_first()) {
        (None, None) => true,
        (Some((b'*', rest)), _) => {
            glob_match(rest, name) || (!name.is_empty() && glob_match(pattern, &name[1..]))
        }
        (Some((b'?', p_rest)), Some((_, n_rest))) => glob_match(p_rest, n_rest),
        (Some((p, p_rest)), Some((n, n_rest))) => {
            p.eq_ignore_ascii_case(n) && glob_match(p_rest, n_rest)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("cliprdr", "cliprdr", true)]
    #[case("CLIPRDR", "cliprdr", true)]
    #[case("cliprdr", "ClipRdr", true)]
    #[case("clip*", "cliprdr", true)]
    #[case("*", "anything", true)]
    #[case("*", "", true)]
    #[case("rai?", "rail", true)]
    #[case("rai?", "rails", false)]
    #[case("clip?dr", "cliprdr", true)]
    #[case("rdpdr", "rdpsnd", false)]
    #[case("", "", true)]
    #[case("", "x", false)]
    #[case("Microsoft::Windows::RDS::*", "Microsoft::Windows::RDS::Graphics", true)]
    #[case("Microsoft::Windows::RDS::*", "Microsoft::Windows::Shell", false)]
    fn glob_matching(#[case] pattern: &str, #[case] name: &str, #[case] expected: bool) {
        assert_eq!(glob_match(pattern.as_bytes(), name.as_bytes()), expected);
    }

    #[test]
    fn deny_takes_precedence_over_allow() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted)
            .allow_channels(["*"])
            .deny_channels(["cliprdr"]);

        assert!(!authorizer.is_authorized("cliprdr"));
        assert!(!authorizer.is_authorized("CLIPRDR"));
        assert!(authorizer.is_authorized("rdpdr"));
    }

    #[rstest]
    #[case(UnlistedPolicy::DenyUnlisted, false)]
    #[case(UnlistedPolicy::AllowUnlisted, true)]
    fn unlisted_names_follow_the_default(#[case] unlisted: UnlistedPolicy, #[case] expected: bool) {
        let authorizer = ChannelAuthorizer::new(unlisted);

        assert_eq!(authorizer.is_authorized("rdpsnd"), expected);
        assert_eq!(authorizer.is_dynamic_channel_authorized("AUDIO_PLAYBACK_DVC"), expected);
    }

    #[test]
    fn dynamic_channel_lists_are_independent_from_static_ones() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted)
            .allow_channels(["cliprdr"])
            .allow_dynamic_channels(["Microsoft::Windows::RDS::*"])
            .deny_dynamic_channels(["Microsoft::Windows::RDS::Graphics"]);

        assert!(authorizer.is_authorized("cliprdr"));
        assert!(!authorizer.is_dynamic_channel_authorized("cliprdr"));

        assert!(authorizer.is_dynamic_channel_authorized("Microsoft::Windows::RDS::DisplayControl"));
        assert!(!authorizer.is_dynamic_channel_authorized("Microsoft::Windows::RDS::Graphics"));
    }

    #[test]
    fn sub_capabilities_start_denied() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::AllowUnlisted);

        assert!(!authorizer.is_clipboard_up_authorized());
        assert!(!authorizer.is_clipboard_down_authorized());
        assert!(!authorizer.is_clipboard_file_transfer_authorized());
        assert!(!authorizer.is_device_class_authorized(DeviceClass::Drive));
        assert!(!authorizer.is_device_class_authorized(DeviceClass::Smartcard));
    }

    #[test]
    fn device_classes_are_granted_individually() {
        let authorizer = ChannelAuthorizer::new(UnlistedPolicy::DenyUnlisted)
            .allow_device_class(DeviceClass::Drive)
            .allow_device_class(DeviceClass::Smartcard);

        assert!(authorizer.is_device_class_authorized(DeviceClass::Drive));
        assert!(authorizer.is_device_class_authorized(DeviceClass::Smartcard));
        assert!(!authorizer.is_device_class_authorized(DeviceClass::Printer));
        assert!(!authorizer.is_device_class_authorized(DeviceClass::Port));
    }
}
