//! One parsed line of `locking_state`.
//!
//! Lines are whitespace separated. Token 0 is the debug format version
//! (`0x3` or `0x4`); the rest map positionally onto a fixed schema. The
//! version 4 schema is the version 3 schema plus three trailing fields.
//!
//! Hang detection runs once, while parsing: a version 4 record whose
//! outstanding request has been waiting longer than the polling interval has
//! its total time for the requested level replaced by a hang marker.

use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::ParseError;
use crate::identity::LockIdentity;

/// DLM protected-read mode as reported in `l_requested`.
pub const DLM_LOCK_PR: i32 = 3;
/// DLM exclusive mode as reported in `l_requested`.
pub const DLM_LOCK_EX: i32 = 5;

const LVB_LEN: usize = 64;

/// One named field of the debug format and the number of tokens it spans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub width: usize,
}

const fn field(name: &'static str, width: usize) -> FieldSpec {
    FieldSpec { name, width }
}

/// Field layout of debug format version 3.
pub const SCHEMA_V3: &[FieldSpec] = &[
    field("debug_ver", 1),
    field("name", 1),
    field("l_level", 1),
    field("l_flags", 1),
    field("l_action", 1),
    field("l_unlock_action", 1),
    field("l_ro_holders", 1),
    field("l_ex_holders", 1),
    field("l_requested", 1),
    field("l_blocking", 1),
    field("lvb_64B", LVB_LEN),
    field("lock_num_prmode", 1),
    field("lock_num_exmode", 1),
    field("lock_num_prmode_failed", 1),
    field("lock_num_exmode_failed", 1),
    field("lock_total_prmode", 1),
    field("lock_total_exmode", 1),
    field("lock_max_prmode", 1),
    field("lock_max_exmode", 1),
    field("lock_refresh", 1),
];

/// Fields appended by debug format version 4.
pub const SCHEMA_V4_EXTRA: &[FieldSpec] = &[
    field("lock_last_prmode", 1),
    field("lock_last_exmode", 1),
    field("lock_wait", 1),
];

/// Number of tokens a record of the given schema spans.
pub fn token_count(schema: &[FieldSpec]) -> usize {
    schema.iter().map(|f| f.width).sum()
}

/// Lock level whose statistics are being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockLevel {
    Pr,
    Ex,
}

impl LockLevel {
    pub const ALL: [LockLevel; 2] = [LockLevel::Pr, LockLevel::Ex];

    fn index(self) -> usize {
        match self {
            LockLevel::Pr => 0,
            LockLevel::Ex => 1,
        }
    }

    /// Column prefix used in reports.
    pub fn label(self) -> &'static str {
        match self {
            LockLevel::Pr => "PR",
            LockLevel::Ex => "EX",
        }
    }
}

/// Fields common to every supported debug format version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockState {
    pub level: i32,
    pub flags: u32,
    pub action: u32,
    pub unlock_action: u32,
    pub ro_holders: u32,
    pub ex_holders: u32,
    pub requested: i32,
    pub blocking: i32,
    pub lvb: [u8; LVB_LEN],
    pub num_prmode: u64,
    pub num_exmode: u64,
    pub num_prmode_failed: u64,
    pub num_exmode_failed: u64,
    /// Cumulative nanoseconds spent acquiring PR.
    pub total_prmode: u64,
    /// Cumulative nanoseconds spent acquiring EX.
    pub total_exmode: u64,
    pub max_prmode: u64,
    pub max_exmode: u64,
    pub refresh: u64,
}

/// Fields only present in version 4 records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitState {
    pub last_prmode: u64,
    pub last_exmode: u64,
    /// Microsecond timestamp at which the pending request started, 0 if none.
    pub wait: u64,
}

/// Record body, tagged by debug format version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    V3(LockState),
    V4(LockState, WaitState),
}

impl Record {
    pub fn version(&self) -> u8 {
        match self {
            Record::V3(_) => 3,
            Record::V4(..) => 4,
        }
    }

    pub fn state(&self) -> &LockState {
        match self {
            Record::V3(state) | Record::V4(state, _) => state,
        }
    }

    pub fn wait_state(&self) -> Option<&WaitState> {
        match self {
            Record::V3(_) => None,
            Record::V4(_, wait) => Some(wait),
        }
    }
}

/// Immutable snapshot of one lock's counters on one node.
#[derive(Debug, Clone)]
pub struct Sample {
    identity: LockIdentity,
    record: Record,
    /// Seconds the pending request has waited, per level, when hung.
    hang: [Option<f64>; 2],
}

impl Sample {
    /// Parse a raw line.
    ///
    /// `now` and `hang_threshold` drive hang detection: a pending request
    /// older than `hang_threshold` marks its level as hung.
    pub fn parse(line: &str, now: SystemTime, hang_threshold: Duration) -> Result<Self, ParseError> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let version_token = *tokens.first().ok_or(ParseError::Empty)?;
        let version = parse_version(version_token)?;

        let expected = match version {
            3 => token_count(SCHEMA_V3),
            _ => token_count(SCHEMA_V3) + token_count(SCHEMA_V4_EXTRA),
        };
        if tokens.len() != expected {
            return Err(ParseError::MalformedRecord {
                version,
                found: tokens.len(),
                expected,
            });
        }

        let mut reader = FieldReader::new(&tokens, SCHEMA_V3);
        reader.skip("debug_ver");
        let identity = LockIdentity::decode(reader.single("name"))?;
        let state = LockState {
            level: reader.decimal("l_level")?,
            flags: reader.hex("l_flags")?,
            action: reader.hex("l_action")?,
            unlock_action: reader.hex("l_unlock_action")?,
            ro_holders: reader.decimal("l_ro_holders")?,
            ex_holders: reader.decimal("l_ex_holders")?,
            requested: reader.decimal("l_requested")?,
            blocking: reader.decimal("l_blocking")?,
            lvb: reader.lvb("lvb_64B")?,
            num_prmode: reader.decimal("lock_num_prmode")?,
            num_exmode: reader.decimal("lock_num_exmode")?,
            num_prmode_failed: reader.decimal("lock_num_prmode_failed")?,
            num_exmode_failed: reader.decimal("lock_num_exmode_failed")?,
            total_prmode: reader.decimal("lock_total_prmode")?,
            total_exmode: reader.decimal("lock_total_exmode")?,
            max_prmode: reader.decimal("lock_max_prmode")?,
            max_exmode: reader.decimal("lock_max_exmode")?,
            refresh: reader.decimal("lock_refresh")?,
        };

        let record = if version == 3 {
            Record::V3(state)
        } else {
            let mut reader = reader.continue_with(SCHEMA_V4_EXTRA);
            let wait = WaitState {
                last_prmode: reader.decimal("lock_last_prmode")?,
                last_exmode: reader.decimal("lock_last_exmode")?,
                wait: reader.decimal("lock_wait")?,
            };
            Record::V4(state, wait)
        };

        let mut sample = Self {
            identity,
            record,
            hang: [None, None],
        };
        sample.detect_hang(now, hang_threshold);
        Ok(sample)
    }

    fn detect_hang(&mut self, now: SystemTime, threshold: Duration) {
        let Some(wait) = self.record.wait_state().map(|w| w.wait) else {
            return;
        };
        if wait == 0 {
            return;
        }

        let now_secs = now
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64();
        let waited = now_secs - wait as f64 / 1_000_000.0;
        if waited <= threshold.as_secs_f64() {
            return;
        }

        match self.record.state().requested {
            DLM_LOCK_PR => self.hang[LockLevel::Pr.index()] = Some(waited),
            DLM_LOCK_EX => self.hang[LockLevel::Ex.index()] = Some(waited),
            _ => {}
        }
    }

    pub fn identity(&self) -> &LockIdentity {
        &self.identity
    }

    pub fn record(&self) -> &Record {
        &self.record
    }

    pub fn version(&self) -> u8 {
        self.record.version()
    }

    /// False for placeholder records whose inode decodes to 0.
    pub fn legal(&self) -> bool {
        self.identity.is_legal()
    }

    /// Cumulative nanoseconds spent acquiring `level`, or `None` while the
    /// level is hung.
    pub fn total_time(&self, level: LockLevel) -> Option<u64> {
        if self.is_hung(level) {
            return None;
        }
        let state = self.record.state();
        Some(match level {
            LockLevel::Pr => state.total_prmode,
            LockLevel::Ex => state.total_exmode,
        })
    }

    /// Cumulative number of acquisitions of `level`.
    pub fn total_count(&self, level: LockLevel) -> u64 {
        let state = self.record.state();
        match level {
            LockLevel::Pr => state.num_prmode,
            LockLevel::Ex => state.num_exmode,
        }
    }

    pub fn is_hung(&self, level: LockLevel) -> bool {
        self.hang[level.index()].is_some()
    }

    /// Seconds the pending `level` request had been waiting at parse time.
    pub fn hang_duration(&self, level: LockLevel) -> Option<f64> {
        self.hang[level.index()]
    }
}

fn parse_version(token: &str) -> Result<u8, ParseError> {
    let digits = token.strip_prefix("0x").unwrap_or(token);
    match u8::from_str_radix(digits, 16) {
        Ok(version @ (3 | 4)) => Ok(version),
        _ => Err(ParseError::UnsupportedVersion(token.to_owned())),
    }
}

/// Walks a schema in order, handing out the tokens of each field.
struct FieldReader<'t> {
    tokens: &'t [&'t str],
    schema: &'static [FieldSpec],
    pos: usize,
    next_field: usize,
}

impl<'t> FieldReader<'t> {
    fn new(tokens: &'t [&'t str], schema: &'static [FieldSpec]) -> Self {
        Self {
            tokens,
            schema,
            pos: 0,
            next_field: 0,
        }
    }

    fn continue_with(self, schema: &'static [FieldSpec]) -> Self {
        Self {
            tokens: self.tokens,
            schema,
            pos: self.pos,
            next_field: 0,
        }
    }

    fn take(&mut self, name: &'static str) -> &'t [&'t str] {
        let spec = self.schema[self.next_field];
        debug_assert_eq!(spec.name, name, "fields must be read in schema order");
        self.next_field += 1;
        let tokens = &self.tokens[self.pos..self.pos + spec.width];
        self.pos += spec.width;
        tokens
    }

    fn skip(&mut self, name: &'static str) {
        self.take(name);
    }

    fn single(&mut self, name: &'static str) -> &'t str {
        self.take(name)[0]
    }

    fn decimal<T: FromStr>(&mut self, name: &'static str) -> Result<T, ParseError> {
        let token = self.single(name);
        token.parse().map_err(|_| ParseError::InvalidField {
            field: name,
            value: token.to_owned(),
        })
    }

    fn hex(&mut self, name: &'static str) -> Result<u32, ParseError> {
        let token = self.single(name);
        parse_hex(token).ok_or_else(|| ParseError::InvalidField {
            field: name,
            value: token.to_owned(),
        })
    }

    fn lvb(&mut self, name: &'static str) -> Result<[u8; LVB_LEN], ParseError> {
        let mut lvb = [0u8; LVB_LEN];
        for (slot, token) in lvb.iter_mut().zip(self.take(name)) {
            *slot = parse_hex(token)
                .and_then(|byte| u8::try_from(byte).ok())
                .ok_or_else(|| ParseError::InvalidField {
                    field: name,
                    value: (*token).to_owned(),
                })?;
        }
        Ok(lvb)
    }
}

fn parse_hex(token: &str) -> Option<u32> {
    let digits = token.strip_prefix("0x").unwrap_or(token);
    u32::from_str_radix(digits, 16).ok()
}
