//! Client Info PDU (MS-RDPBCGR 2.2.1.11.1.1), carried with the `INFO_PKT`
//! security flag right after the MCS channels are joined.

use core::fmt;

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;

use rdpgate_core::{
    cast_length, ensure_fixed_part_size, ensure_size, invalid_field_err, read_padding, Decode, Encode, PduResult,
    ReadCursor, WriteCursor,
};

use crate::utf16::{self, CharacterSet};

const RECONNECT_COOKIE_LEN: usize = 28;
const TIMEZONE_INFO_NAME_LEN: usize = 64;
const COMPRESSION_TYPE_MASK: u32 = 0x0000_1E00;

const CODE_PAGE_SIZE: usize = 4;
const FLAGS_SIZE: usize = 4;
const STRING_LENGTH_SIZE: usize = 2;

const CLIENT_ADDRESS_FAMILY_SIZE: usize = 2;
const SESSION_ID_SIZE: usize = 4;
const PERFORMANCE_FLAGS_SIZE: usize = 4;
const RECONNECT_COOKIE_LENGTH_SIZE: usize = 2;
const BIAS_SIZE: usize = 4;
const SYSTEM_TIME_SIZE: usize = 16;

/// [2.2.1.11.1.1] Info Packet (TS_INFO_PACKET)
///
/// [2.2.1.11.1.1]: https://learn.microsoft.com/en-us/openspecs/windows_protocols/ms-rdpbcgr/732394f5-e2b5-4ac5-8a0a-35345386b0d1
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    pub credentials: Credentials,
    pub code_page: u32,
    pub flags: ClientInfoFlags,
    pub compression_type: CompressionType,
    pub alternate_shell: String,
    pub work_dir: String,
    pub extra_info: ExtendedClientInfo,
}

impl ClientInfo {
    const NAME: &'static str = "ClientInfo";

    pub const FIXED_PART_SIZE: usize = CODE_PAGE_SIZE + FLAGS_SIZE + STRING_LENGTH_SIZE * 5;

    fn character_set(&self) -> CharacterSet {
        if self.flags.contains(ClientInfoFlags::UNICODE) {
            CharacterSet::Unicode
        } else {
            CharacterSet::Ansi
        }
    }
}

impl Encode for ClientInfo {
    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_size!(in: dst, size: self.size());

        let character_set = self.character_set();

        dst.write_u32(self.code_page);

        let flags_with_compression_type = self.flags.bits() | ((self.compression_type as u32) << 9);
        dst.write_u32(flags_with_compression_type);

        let domain = self.credentials.domain.as_deref().unwrap_or_default();

        // Sizes exclude the length of the mandatory null terminator.
        for value in [
            domain,
            self.credentials.username.as_str(),
            self.credentials.password.as_str(),
            self.alternate_shell.as_str(),
            self.work_dir.as_str(),
        ] {
            dst.write_u16(cast_length!(
                "stringLength",
                utf16::encoded_str_len(value, character_set, false)
            )?);
        }

        utf16::write_string_to_cursor(dst, domain, character_set, true)?;
        utf16::write_string_to_cursor(dst, self.credentials.username.as_str(), character_set, true)?;
        utf16::write_string_to_cursor(dst, self.credentials.password.as_str(), character_set, true)?;
        utf16::write_string_to_cursor(dst, self.alternate_shell.as_str(), character_set, true)?;
        utf16::write_string_to_cursor(dst, self.work_dir.as_str(), character_set, true)?;

        self.extra_info.encode(dst, character_set)
    }

    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn size(&self) -> usize {
        let character_set = self.character_set();
        let domain = self.credentials.domain.as_deref().unwrap_or_default();

        Self::FIXED_PART_SIZE
            + utf16::encoded_str_len(domain, character_set, true)
            + utf16::encoded_str_len(self.credentials.username.as_str(), character_set, true)
            + utf16::encoded_str_len(self.credentials.password.as_str(), character_set, true)
            + utf16::encoded_str_len(self.alternate_shell.as_str(), character_set, true)
            + utf16::encoded_str_len(self.work_dir.as_str(), character_set, true)
            + self.extra_info.size(character_set)
    }
}

impl<'de> Decode<'de> for ClientInfo {
    fn decode(src: &mut ReadCursor<'de>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let code_page = src.read_u32();
        let flags_with_compression_type = src.read_u32();

        let flags = ClientInfoFlags::from_bits(flags_with_compression_type & !COMPRESSION_TYPE_MASK)
            .ok_or_else(|| invalid_field_err(Self::NAME, "flags", "unknown client info flags"))?;
        let compression_type =
            CompressionType::from_u8(((flags_with_compression_type & COMPRESSION_TYPE_MASK) >> 9) as u8)
                .ok_or_else(|| invalid_field_err(Self::NAME, "flags", "unknown compression type"))?;
        let character_set = if flags.contains(ClientInfoFlags::UNICODE) {
            CharacterSet::Unicode
        } else {
            CharacterSet::Ansi
        };

        // Sizes exclude the length of the mandatory null terminator.
        let domain_size = usize::from(src.read_u16());
        let user_name_size = usize::from(src.read_u16());
        let password_size = usize::from(src.read_u16());
        let alternate_shell_size = usize::from(src.read_u16());
        let work_dir_size = usize::from(src.read_u16());

        let domain = read_sized_string(src, domain_size, character_set, true)?;
        let username = read_sized_string(src, user_name_size, character_set, true)?;
        let password = read_sized_string(src, password_size, character_set, true)?;

        let domain = if domain.is_empty() { None } else { Some(domain) };
        let credentials = Credentials {
            username,
            password,
            domain,
        };

        let alternate_shell = read_sized_string(src, alternate_shell_size, character_set, true)?;
        let work_dir = read_sized_string(src, work_dir_size, character_set, true)?;

        let extra_info = ExtendedClientInfo::decode(src, character_set)?;

        Ok(Self {
            credentials,
            code_page,
            flags,
            compression_type,
            alternate_shell,
            work_dir,
            extra_info,
        })
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
    pub domain: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // NOTE: do not show the password
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedClientInfo {
    pub address_family: AddressFamily,
    pub address: String,
    pub dir: String,
    pub optional_data: ExtendedClientOptionalInfo,
}

impl ExtendedClientInfo {
    const NAME: &'static str = "ExtendedClientInfo";

    fn decode(src: &mut ReadCursor<'_>, character_set: CharacterSet) -> PduResult<Self> {
        ensure_size!(ctx: Self::NAME, in: src, size: CLIENT_ADDRESS_FAMILY_SIZE + STRING_LENGTH_SIZE);

        let address_family = AddressFamily::from_u16(src.read_u16())
            .ok_or_else(|| invalid_field_err(Self::NAME, "clientAddressFamily", "unknown address family"))?;

        // These sizes include the length of the mandatory null terminator.
        let address_size = usize::from(src.read_u16());
        let address = read_sized_string(src, address_size, character_set, false)?;

        ensure_size!(ctx: Self::NAME, in: src, size: STRING_LENGTH_SIZE);
        let dir_size = usize::from(src.read_u16());
        let dir = read_sized_string(src, dir_size, character_set, false)?;

        let optional_data = ExtendedClientOptionalInfo::decode(src)?;

        Ok(Self {
            address_family,
            address,
            dir,
            optional_data,
        })
    }

    fn encode(&self, dst: &mut WriteCursor<'_>, character_set: CharacterSet) -> PduResult<()> {
        dst.write_u16(self.address_family as u16);

        dst.write_u16(cast_length!(
            "clientAddressLen",
            utf16::encoded_str_len(self.address.as_str(), character_set, true)
        )?);
        utf16::write_string_to_cursor(dst, self.address.as_str(), character_set, true)?;

        dst.write_u16(cast_length!(
            "clientDirLen",
            utf16::encoded_str_len(self.dir.as_str(), character_set, true)
        )?);
        utf16::write_string_to_cursor(dst, self.dir.as_str(), character_set, true)?;

        self.optional_data.encode(dst)
    }

    fn size(&self, character_set: CharacterSet) -> usize {
        CLIENT_ADDRESS_FAMILY_SIZE
            + STRING_LENGTH_SIZE
            + utf16::encoded_str_len(self.address.as_str(), character_set, true)
            + STRING_LENGTH_SIZE
            + utf16::encoded_str_len(self.dir.as_str(), character_set, true)
            + self.optional_data.size()
    }
}

/// Optional tail of the extended client info block.
///
/// Each field may only be present when every preceding field is present,
/// hence the state machine based builder which enforces the order at compile
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtendedClientOptionalInfo {
    timezone: Option<TimezoneInfo>,
    session_id: Option<u32>,
    performance_flags: Option<PerformanceFlags>,
    reconnect_cookie: Option<[u8; RECONNECT_COOKIE_LEN]>,
    // other fields are read by RdpVersion::Ten+
}

impl ExtendedClientOptionalInfo {
    const NAME: &'static str = "ExtendedClientOptionalInfo";

    pub fn builder() -> builder::ExtendedClientOptionalInfoBuilder<builder::SetTimezone> {
        builder::ExtendedClientOptionalInfoBuilder::new()
    }

    pub fn timezone(&self) -> Option<&TimezoneInfo> {
        self.timezone.as_ref()
    }

    pub fn session_id(&self) -> Option<u32> {
        self.session_id
    }

    pub fn performance_flags(&self) -> Option<PerformanceFlags> {
        self.performance_flags
    }

    pub fn reconnect_cookie(&self) -> Option<&[u8; RECONNECT_COOKIE_LEN]> {
        self.reconnect_cookie.as_ref()
    }

    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        if let Some(ref timezone) = self.timezone {
            timezone.encode(dst)?;
        } else {
            return Ok(());
        }
        if let Some(session_id) = self.session_id {
            dst.write_u32(session_id);
        } else {
            return Ok(());
        }
        if let Some(performance_flags) = self.performance_flags {
            dst.write_u32(performance_flags.bits());
        } else {
            return Ok(());
        }
        if let Some(reconnect_cookie) = self.reconnect_cookie {
            dst.write_u16(RECONNECT_COOKIE_LEN as u16);
            dst.write_slice(&reconnect_cookie);
        }

        Ok(())
    }

    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        let mut optional_data = Self::default();

        if src.len() < TimezoneInfo::FIXED_PART_SIZE {
            return Ok(optional_data);
        }
        optional_data.timezone = Some(TimezoneInfo::decode(src)?);

        if src.len() < SESSION_ID_SIZE {
            return Ok(optional_data);
        }
        optional_data.session_id = Some(src.read_u32());

        if src.len() < PERFORMANCE_FLAGS_SIZE {
            return Ok(optional_data);
        }
        optional_data.performance_flags = Some(
            PerformanceFlags::from_bits(src.read_u32())
                .ok_or_else(|| invalid_field_err(Self::NAME, "performanceFlags", "unknown performance flags"))?,
        );

        if src.len() < RECONNECT_COOKIE_LENGTH_SIZE {
            return Ok(optional_data);
        }
        let reconnect_cookie_size = usize::from(src.read_u16());
        if reconnect_cookie_size != RECONNECT_COOKIE_LEN && reconnect_cookie_size != 0 {
            return Err(invalid_field_err(Self::NAME, "cbAutoReconnectCookie", "invalid cookie size"));
        }
        if reconnect_cookie_size == 0 {
            return Ok(optional_data);
        }

        ensure_size!(ctx: Self::NAME, in: src, size: RECONNECT_COOKIE_LEN);
        optional_data.reconnect_cookie = Some(src.read_array());

        if src.len() >= 4 {
            read_padding!(src, 4); // reserved1 + reserved2
        }

        Ok(optional_data)
    }

    fn size(&self) -> usize {
        let mut size = 0;

        if let Some(ref timezone) = self.timezone {
            size += timezone.size();
        }
        if self.session_id.is_some() {
            size += SESSION_ID_SIZE;
        }
        if self.performance_flags.is_some() {
            size += PERFORMANCE_FLAGS_SIZE;
        }
        if self.reconnect_cookie.is_some() {
            size += RECONNECT_COOKIE_LENGTH_SIZE + RECONNECT_COOKIE_LEN;
        }

        size
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimezoneInfo {
    pub bias: u32,
    pub standard_name: String,
    pub standard_date: Option<SystemTime>,
    pub standard_bias: u32,
    pub daylight_name: String,
    pub daylight_date: Option<SystemTime>,
    pub daylight_bias: u32,
}

impl TimezoneInfo {
    const NAME: &'static str = "TimezoneInfo";

    pub const FIXED_PART_SIZE: usize =
        BIAS_SIZE * 3 + TIMEZONE_INFO_NAME_LEN * 2 + SYSTEM_TIME_SIZE * 2;

    fn encode(&self, dst: &mut WriteCursor<'_>) -> PduResult<()> {
        ensure_fixed_part_size!(in: dst);

        dst.write_u32(self.bias);
        write_timezone_name(dst, self.standard_name.as_str());
        encode_system_time(&self.standard_date, dst);
        dst.write_u32(self.standard_bias);

        write_timezone_name(dst, self.daylight_name.as_str());
        encode_system_time(&self.daylight_date, dst);
        dst.write_u32(self.daylight_bias);

        Ok(())
    }

    fn decode(src: &mut ReadCursor<'_>) -> PduResult<Self> {
        ensure_fixed_part_size!(in: src);

        let bias = src.read_u32();
        let standard_name = read_timezone_name(src);
        let standard_date = decode_system_time(src);
        let standard_bias = src.read_u32();

        let daylight_name = read_timezone_name(src);
        let daylight_date = decode_system_time(src);
        let daylight_bias = src.read_u32();

        Ok(Self {
            bias,
            standard_name,
            standard_date,
            standard_bias,
            daylight_name,
            daylight_date,
            daylight_bias,
        })
    }

    fn size(&self) -> usize {
        Self::FIXED_PART_SIZE
    }
}

fn write_timezone_name(dst: &mut WriteCursor<'_>, name: &str) {
    let mut buffer = utf16::to_utf16_bytes(name);
    buffer.resize(TIMEZONE_INFO_NAME_LEN, 0);
    dst.write_slice(&buffer);
}

fn read_timezone_name(src: &mut ReadCursor<'_>) -> String {
    let buffer = src.read_slice(TIMEZONE_INFO_NAME_LEN);
    utf16::from_utf16_bytes(buffer).trim_end_matches('\0').into()
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SystemTime {
    pub month: Month,
    pub day_of_week: DayOfWeek,
    pub day: DayOfWeekOccurrence,
    pub hour: u16,
    pub minute: u16,
    pub second: u16,
    pub milliseconds: u16,
}

// An all-zero TS_SYSTEMTIME means "no transition date", hence the Option.
fn decode_system_time(src: &mut ReadCursor<'_>) -> Option<SystemTime> {
    let _year = src.read_u16(); // MUST be zero
    let month = Month::from_u16(src.read_u16());
    let day_of_week = DayOfWeek::from_u16(src.read_u16());
    let day = DayOfWeekOccurrence::from_u16(src.read_u16());
    let hour = src.read_u16();
    let minute = src.read_u16();
    let second = src.read_u16();
    let milliseconds = src.read_u16();

    match (month, day_of_week, day) {
        (Some(month), Some(day_of_week), Some(day)) => Some(SystemTime {
            month,
            day_of_week,
            day,
            hour,
            minute,
            second,
            milliseconds,
        }),
        _ => None,
    }
}

fn encode_system_time(time: &Option<SystemTime>, dst: &mut WriteCursor<'_>) {
    dst.write_u16(0); // year
    match *time {
        Some(time) => {
            dst.write_u16(time.month as u16);
            dst.write_u16(time.day_of_week as u16);
            dst.write_u16(time.day as u16);
            dst.write_u16(time.hour);
            dst.write_u16(time.minute);
            dst.write_u16(time.second);
            dst.write_u16(time.milliseconds);
        }
        None => {
            for _ in 0..7 {
                dst.write_u16(0);
            }
        }
    }
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum Month {
    January = 1,
    February = 2,
    March = 3,
    April = 4,
    May = 5,
    June = 6,
    July = 7,
    August = 8,
    September = 9,
    October = 10,
    November = 11,
    December = 12,
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum DayOfWeek {
    Sunday = 0,
    Monday = 1,
    Tuesday = 2,
    Wednesday = 3,
    Thursday = 4,
    Friday = 5,
    Saturday = 6,
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum DayOfWeekOccurrence {
    First = 1,
    Second = 2,
    Third = 3,
    Fourth = 4,
    Last = 5,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct PerformanceFlags: u32 {
        const DISABLE_WALLPAPER = 0x0000_0001;
        const DISABLE_FULLWINDOWDRAG = 0x0000_0002;
        const DISABLE_MENUANIMATIONS = 0x0000_0004;
        const DISABLE_THEMING = 0x0000_0008;
        const RESERVED1 = 0x0000_0010;
        const DISABLE_CURSOR_SHADOW = 0x0000_0020;
        const DISABLE_CURSORSETTINGS = 0x0000_0040;
        const ENABLE_FONT_SMOOTHING = 0x0000_0080;
        const ENABLE_DESKTOP_COMPOSITION = 0x0000_0100;
        const RESERVED2 = 0x8000_0000;
    }
}

#[repr(u16)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum AddressFamily {
    INet = 0x0002,
    INet6 = 0x0017,
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
    pub struct ClientInfoFlags: u32 {
        /// INFO_MOUSE
        const MOUSE = 0x0000_0001;
        /// INFO_DISABLECTRLALTDEL
        const DISABLE_CTRL_ALT_DEL = 0x0000_0002;
        /// INFO_AUTOLOGON
        const AUTOLOGON = 0x0000_0008;
        /// INFO_UNICODE
        const UNICODE = 0x0000_0010;
        /// INFO_MAXIMIZESHELL
        const MAXIMIZE_SHELL = 0x0000_0020;
        /// INFO_LOGONNOTIFY
        const LOGON_NOTIFY = 0x0000_0040;
        /// INFO_COMPRESSION
        const COMPRESSION = 0x0000_0080;
        /// INFO_ENABLEWINDOWSKEY
        const ENABLE_WINDOWS_KEY = 0x0000_0100;
        /// INFO_REMOTECONSOLEAUDIO
        const REMOTE_CONSOLE_AUDIO = 0x0000_2000;
        /// INFO_FORCE_ENCRYPTED_CS_PDU
        const FORCE_ENCRYPTED_CS_PDU = 0x0000_4000;
        /// INFO_RAIL
        const RAIL = 0x0000_8000;
        /// INFO_LOGONERRORS
        const LOGON_ERRORS = 0x0001_0000;
        /// INFO_MOUSE_HAS_WHEEL
        const MOUSE_HAS_WHEEL = 0x0002_0000;
        /// INFO_PASSWORD_IS_SC_PIN
        const PASSWORD_IS_SC_PIN = 0x0004_0000;
        /// INFO_NOAUDIOPLAYBACK
        const NO_AUDIO_PLAYBACK = 0x0008_0000;
        /// INFO_USING_SAVED_CREDS
        const USING_SAVED_CREDS = 0x0010_0000;
        /// INFO_AUDIOCAPTURE
        const AUDIO_CAPTURE = 0x0020_0000;
        /// INFO_VIDEO_DISABLE
        const VIDEO_DISABLE = 0x0040_0000;
        /// INFO_RESERVED1
        const RESERVED1 = 0x0080_0000;
        /// INFO_RESERVED2
        const RESERVED2 = 0x0100_0000;
        /// INFO_HIDEF_RAIL_SUPPORTED
        const HIDEF_RAIL_SUPPORTED = 0x0200_0000;
    }
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum CompressionType {
    K8 = 0,
    K64 = 1,
    Rdp6 = 2,
    Rdp61 = 3,
}

fn read_sized_string(
    src: &mut ReadCursor<'_>,
    size: usize,
    character_set: CharacterSet,
    size_excludes_null_terminator: bool,
) -> PduResult<String> {
    let terminator_len = if size_excludes_null_terminator {
        match character_set {
            CharacterSet::Ansi => 1,
            CharacterSet::Unicode => 2,
        }
    } else {
        0
    };

    let total = size + terminator_len;
    ensure_size!(ctx: "ClientInfoString", in: src, size: total);
    let bytes = src.read_slice(total);

    let decoded = match character_set {
        CharacterSet::Unicode => utf16::from_utf16_bytes(bytes),
        CharacterSet::Ansi => String::from_utf8(bytes.to_vec())
            .map_err(|_| invalid_field_err("ClientInfoString", "buffer", "not valid UTF-8"))?,
    };

    Ok(decoded.trim_end_matches('\0').into())
}

pub mod builder {
    //! Typestate builder for [`ExtendedClientOptionalInfo`].

    use core::marker::PhantomData;

    use super::{ExtendedClientOptionalInfo, PerformanceFlags, TimezoneInfo, RECONNECT_COOKIE_LEN};

    pub struct SetTimezone;
    pub struct SetSessionId;
    pub struct SetPerformanceFlags;
    pub struct SetReconnectCookie;
    pub struct Final;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct ExtendedClientOptionalInfoBuilder<State> {
        inner: ExtendedClientOptionalInfo,
        _phantom_data: PhantomData<State>,
    }

    impl ExtendedClientOptionalInfoBuilder<SetTimezone> {
        pub(super) fn new() -> Self {
            ExtendedClientOptionalInfoBuilder {
                inner: ExtendedClientOptionalInfo::default(),
                _phantom_data: PhantomData,
            }
        }
    }

    impl<State> ExtendedClientOptionalInfoBuilder<State> {
        pub fn build(self) -> ExtendedClientOptionalInfo {
            self.inner
        }

        fn transition<Next>(self) -> ExtendedClientOptionalInfoBuilder<Next> {
            ExtendedClientOptionalInfoBuilder {
                inner: self.inner,
                _phantom_data: PhantomData,
            }
        }
    }

    impl ExtendedClientOptionalInfoBuilder<SetTimezone> {
        pub fn timezone(mut self, timezone: TimezoneInfo) -> ExtendedClientOptionalInfoBuilder<SetSessionId> {
            self.inner.timezone = Some(timezone);
            self.transition()
        }
    }

    impl ExtendedClientOptionalInfoBuilder<SetSessionId> {
        pub fn session_id(mut self, session_id: u32) -> ExtendedClientOptionalInfoBuilder<SetPerformanceFlags> {
            self.inner.session_id = Some(session_id);
            self.transition()
        }
    }

    impl ExtendedClientOptionalInfoBuilder<SetPerformanceFlags> {
        pub fn performance_flags(
            mut self,
            performance_flags: PerformanceFlags,
        ) -> ExtendedClientOptionalInfoBuilder<SetReconnectCookie> {
            self.inner.performance_flags = Some(performance_flags);
            self.transition()
        }
    }

    impl ExtendedClientOptionalInfoBuilder<SetReconnectCookie> {
        pub fn reconnect_cookie(
            mut self,
            reconnect_cookie: [u8; RECONNECT_COOKIE_LEN],
        ) -> ExtendedClientOptionalInfoBuilder<Final> {
            self.inner.reconnect_cookie = Some(reconnect_cookie);
            self.transition()
        }
    }
}

#[cfg(test)]
mod tests {
    use rdpgate_core::{encode_vec, ReadCursor};

    use super::*;

    fn sample_client_info() -> ClientInfo {
        ClientInfo {
            credentials: Credentials {
                username: "user".to_owned(),
                password: "pass".to_owned(),
                domain: None,
            },
            code_page: 0,
            flags: ClientInfoFlags::UNICODE | ClientInfoFlags::MOUSE,
            compression_type: CompressionType::K8,
            alternate_shell: String::new(),
            work_dir: String::new(),
            extra_info: ExtendedClientInfo {
                address_family: AddressFamily::INet,
                address: "192.0.2.1".to_owned(),
                dir: "C:\\client".to_owned(),
                optional_data: ExtendedClientOptionalInfo::default(),
            },
        }
    }

    #[test]
    fn client_info_round_trip_unicode() {
        let info = sample_client_info();
        let buffer = encode_vec(&info).unwrap();
        assert_eq!(buffer.len(), info.size());

        let decoded = ClientInfo::decode(&mut ReadCursor::new(&buffer)).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn client_info_round_trip_ansi_with_domain() {
        let mut info = sample_client_info();
        info.flags = ClientInfoFlags::MOUSE;
        info.credentials.domain = Some("CONTOSO".to_owned());

        let buffer = encode_vec(&info).unwrap();
        let decoded = ClientInfo::decode(&mut ReadCursor::new(&buffer)).unwrap();
        assert_eq!(decoded, info);
    }

    #[test]
    fn optional_info_round_trip_with_cookie() {
        let mut info = sample_client_info();
        info.extra_info.optional_data = ExtendedClientOptionalInfo::builder()
            .timezone(TimezoneInfo {
                bias: 0,
                standard_name: "UTC".to_owned(),
                standard_date: None,
                standard_bias: 0,
                daylight_name: "UTC".to_owned(),
                daylight_date: None,
                daylight_bias: 0,
            })
            .session_id(7)
            .performance_flags(PerformanceFlags::DISABLE_WALLPAPER)
            .reconnect_cookie([0xAB; 28])
            .build();

        let buffer = encode_vec(&info).unwrap();
        let decoded = ClientInfo::decode(&mut ReadCursor::new(&buffer)).unwrap();

        assert_eq!(decoded.extra_info.optional_data.session_id(), Some(7));
        assert_eq!(decoded.extra_info.optional_data.reconnect_cookie(), Some(&[0xAB; 28]));
    }

    #[test]
    fn optional_info_absent_fields_decode_as_none() {
        let info = sample_client_info();
        let buffer = encode_vec(&info).unwrap();
        let decoded = ClientInfo::decode(&mut ReadCursor::new(&buffer)).unwrap();

        assert_eq!(decoded.extra_info.optional_data, ExtendedClientOptionalInfo::default());
    }
}
