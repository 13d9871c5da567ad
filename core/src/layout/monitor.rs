//! Monitor table: per-monitor sample buffers carried inside the state.
//!
//! ```text
//! 0             count
//! 8 + 16·k      element index of monitor k
//! 16 + 16·k     relative offset of monitor k's record (from table start)
//! record:       start_turn | stop_turn | part_id_start | part_id_stop | samples…
//! sample:       at_turn (-1 = not recorded) | x | px | y | py
//! ```

use super::{
    read_f64, read_i64, read_len, resolve_offset, require_len, span, write_f64, write_i64,
    word_from_len, ByteWriter, WORD,
};
use crate::{
    error::{SimError, SimResult},
    types::{ElementIndex, Turn},
};
use serde::{Deserialize, Serialize};

const RECORD: &str = "monitor table";

pub const TABLE_HEADER: usize = WORD;
pub const ENTRY_STRIDE: usize = 2 * WORD;
pub const MONITOR_HEADER: usize = 4 * WORD;
pub const SAMPLE_STRIDE: usize = 5 * WORD;

/// Which turns and which particle ids a monitor records.
/// Both windows are half-open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorSpec {
    pub start_turn:    i64,
    pub stop_turn:     i64,
    pub part_id_start: i64,
    pub part_id_stop:  i64,
}

impl MonitorSpec {
    pub fn num_turns(&self) -> SimResult<usize> {
        window_len(self.start_turn, self.stop_turn, "turn")
    }

    pub fn num_particles(&self) -> SimResult<usize> {
        window_len(self.part_id_start, self.part_id_stop, "particle")
    }

    pub fn num_samples(&self) -> SimResult<usize> {
        self.num_turns()?
            .checked_mul(self.num_particles()?)
            .ok_or_else(|| SimError::malformed(RECORD, format!("sample count of {self:?} overflows")))
    }

    /// Bytes occupied by this monitor's record in the state. Never more
    /// than a word can address.
    pub fn record_size(&self) -> SimResult<usize> {
        self.num_samples()?
            .checked_mul(SAMPLE_STRIDE)
            .and_then(|samples| samples.checked_add(MONITOR_HEADER))
            .filter(|&size| i64::try_from(size).is_ok())
            .ok_or_else(|| SimError::malformed(RECORD, format!("record size of {self:?} overflows")))
    }

    fn sample_index(&self, turn: Turn, particle_id: i64) -> Option<usize> {
        let turn = i64::try_from(turn).ok()?;
        if !(self.start_turn..self.stop_turn).contains(&turn)
            || !(self.part_id_start..self.part_id_stop).contains(&particle_id)
        {
            return None;
        }
        let row = usize::try_from(turn.checked_sub(self.start_turn)?).ok()?;
        let col = usize::try_from(particle_id.checked_sub(self.part_id_start)?).ok()?;
        row.checked_mul(self.num_particles().ok()?)?.checked_add(col)
    }

    /// Lattice element payload for a monitor element.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut w = ByteWriter::with_capacity(MONITOR_HEADER);
        self.write_words(&mut w);
        w.into_bytes()
    }

    pub fn from_payload(payload: &[u8]) -> SimResult<Self> {
        require_len("monitor element", payload, MONITOR_HEADER)?;
        let spec = Self::read_words(payload, 0);
        spec.validate()?;
        Ok(spec)
    }

    fn write_words(&self, w: &mut ByteWriter) {
        w.push_i64(self.start_turn);
        w.push_i64(self.stop_turn);
        w.push_i64(self.part_id_start);
        w.push_i64(self.part_id_stop);
    }

    fn read_words(buf: &[u8], at: usize) -> Self {
        Self {
            start_turn:    read_i64(buf, at),
            stop_turn:     read_i64(buf, at + WORD),
            part_id_start: read_i64(buf, at + 2 * WORD),
            part_id_stop:  read_i64(buf, at + 3 * WORD),
        }
    }

    pub(crate) fn validate(&self) -> SimResult<()> {
        if self.start_turn < 0 || self.stop_turn < self.start_turn {
            return Err(SimError::malformed(
                RECORD,
                format!("bad turn window [{}, {})", self.start_turn, self.stop_turn),
            ));
        }
        if self.part_id_stop < self.part_id_start {
            return Err(SimError::malformed(
                RECORD,
                format!("bad particle window [{}, {})", self.part_id_start, self.part_id_stop),
            ));
        }
        self.record_size().map(|_| ())
    }
}

/// Length of the half-open window `[start, stop)`.
fn window_len(start: i64, stop: i64, what: &str) -> SimResult<usize> {
    stop.checked_sub(start)
        .and_then(|len| usize::try_from(len).ok())
        .ok_or_else(|| SimError::malformed(RECORD, format!("bad {what} window [{start}, {stop})")))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSample {
    pub at_turn: i64,
    pub x:       f64,
    pub px:      f64,
    pub y:       f64,
    pub py:      f64,
}

/// Encode an empty table for the given monitors.
pub(crate) fn encode_table(monitors: &[(ElementIndex, MonitorSpec)]) -> SimResult<Vec<u8>> {
    let mut records = TABLE_HEADER + span(RECORD, monitors.len(), ENTRY_STRIDE)?;
    for (_, spec) in monitors {
        spec.validate()?;
        records = records
            .checked_add(spec.record_size()?)
            .ok_or_else(|| SimError::malformed(RECORD, "monitor records overflow"))?;
    }
    let mut w = ByteWriter::with_capacity(records);
    w.push_i64(word_from_len(monitors.len()));
    let slots: Vec<usize> = monitors
        .iter()
        .map(|(element, _)| {
            w.push_i64(word_from_len(*element));
            w.reserve_word()
        })
        .collect();
    for ((_, spec), slot) in monitors.iter().zip(slots) {
        let at = w.position();
        w.patch_i64(slot, word_from_len(at));
        spec.write_words(&mut w);
        for _ in 0..spec.num_samples()? {
            w.push_i64(-1);
            for _ in 0..4 {
                w.push_i64(0);
            }
        }
    }
    Ok(w.into_bytes())
}

/// Validate a table and return its monitor descriptors.
pub(crate) fn decode_table(table: &[u8]) -> SimResult<Vec<(ElementIndex, MonitorSpec)>> {
    require_len(RECORD, table, TABLE_HEADER)?;
    let count = read_len(RECORD, table, 0, "monitor count")?;
    require_len(RECORD, table, TABLE_HEADER + span(RECORD, count, ENTRY_STRIDE)?)?;
    (0..count)
        .map(|k| {
            let entry = TABLE_HEADER + k * ENTRY_STRIDE;
            let element = read_len(RECORD, table, entry, "monitor element index")?;
            let at = resolve_offset(RECORD, table, entry + WORD, MONITOR_HEADER)?;
            let spec = MonitorSpec::read_words(table, at);
            spec.validate()?;
            let end = at
                .checked_add(spec.record_size()?)
                .ok_or_else(|| SimError::malformed(RECORD, format!("monitor {k} record overflows")))?;
            require_len(RECORD, table, end)?;
            Ok((element, spec))
        })
        .collect()
}

fn record_at(table: &[u8], k: usize) -> usize {
    // Table was validated at decode; offsets are in bounds.
    read_i64(table, TABLE_HEADER + k * ENTRY_STRIDE + WORD) as usize
}

fn read_sample(buf: &[u8], at: usize) -> MonitorSample {
    MonitorSample {
        at_turn: read_i64(buf, at),
        x:       read_f64(buf, at + WORD),
        px:      read_f64(buf, at + 2 * WORD),
        y:       read_f64(buf, at + 3 * WORD),
        py:      read_f64(buf, at + 4 * WORD),
    }
}

/// Read-only view over the monitor table.
#[derive(Debug, Clone, Copy)]
pub struct Monitors<'a> {
    table: &'a [u8],
}

impl<'a> Monitors<'a> {
    pub(crate) fn new(table: &'a [u8]) -> Self {
        Self { table }
    }

    pub fn count(&self) -> usize {
        read_i64(self.table, 0) as usize
    }

    pub fn element_index(&self, k: usize) -> Option<ElementIndex> {
        (k < self.count()).then(|| read_i64(self.table, TABLE_HEADER + k * ENTRY_STRIDE) as usize)
    }

    pub fn spec(&self, k: usize) -> Option<MonitorSpec> {
        (k < self.count()).then(|| MonitorSpec::read_words(self.table, record_at(self.table, k)))
    }

    pub fn sample(&self, k: usize, turn: Turn, particle_id: i64) -> Option<MonitorSample> {
        let spec = self.spec(k)?;
        let index = spec.sample_index(turn, particle_id)?;
        let at = record_at(self.table, k) + MONITOR_HEADER + index * SAMPLE_STRIDE;
        let sample = read_sample(self.table, at);
        (sample.at_turn >= 0).then_some(sample)
    }

    /// Every recorded sample of monitor `k`, in turn-major order.
    pub fn recorded(&self, k: usize) -> Vec<MonitorSample> {
        let Some(spec) = self.spec(k) else {
            return Vec::new();
        };
        let Ok(samples) = spec.num_samples() else {
            return Vec::new();
        };
        let base = record_at(self.table, k) + MONITOR_HEADER;
        (0..samples)
            .map(|i| read_sample(self.table, base + i * SAMPLE_STRIDE))
            .filter(|s| s.at_turn >= 0)
            .collect()
    }
}

/// Mutable view over the monitor table, handed to the kernel.
#[derive(Debug)]
pub struct MonitorsMut<'a> {
    table: &'a mut [u8],
}

impl<'a> MonitorsMut<'a> {
    pub(crate) fn new(table: &'a mut [u8]) -> Self {
        Self { table }
    }

    pub fn count(&self) -> usize {
        self.as_view().count()
    }

    pub fn as_view(&self) -> Monitors<'_> {
        Monitors::new(self.table)
    }

    /// Store a sample for `particle_id` on `turn` in monitor slot `k`.
    /// Returns false when the sample lies outside the monitor's windows.
    pub fn record(&mut self, k: usize, turn: Turn, particle_id: i64, sample: MonitorSample) -> bool {
        let Some(spec) = self.as_view().spec(k) else {
            return false;
        };
        let Some(index) = spec.sample_index(turn, particle_id) else {
            return false;
        };
        let at = record_at(self.table, k) + MONITOR_HEADER + index * SAMPLE_STRIDE;
        write_i64(self.table, at, sample.at_turn);
        write_f64(self.table, at + WORD, sample.x);
        write_f64(self.table, at + 2 * WORD, sample.px);
        write_f64(self.table, at + 3 * WORD, sample.y);
        write_f64(self.table, at + 4 * WORD, sample.py);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> MonitorSpec {
        MonitorSpec { start_turn: 2, stop_turn: 4, part_id_start: 10, part_id_stop: 13 }
    }

    #[test]
    fn table_round_trips_descriptors() {
        let table = encode_table(&[(5, spec()), (9, MonitorSpec { start_turn: 0, stop_turn: 1, part_id_start: 0, part_id_stop: 1 })]).unwrap();
        let described = decode_table(&table).unwrap();
        assert_eq!(described.len(), 2);
        assert_eq!(described[0], (5, spec()));
        assert_eq!(described[1].0, 9);
        assert_eq!(table.len(), TABLE_HEADER + 2 * ENTRY_STRIDE + spec().record_size().unwrap() + MONITOR_HEADER + SAMPLE_STRIDE);
    }

    #[test]
    fn records_only_inside_windows() {
        let mut table = encode_table(&[(0, spec())]).unwrap();
        let sample = MonitorSample { at_turn: 3, x: 1.0, px: 2.0, y: 3.0, py: 4.0 };
        {
            let mut monitors = MonitorsMut::new(&mut table);
            assert!(monitors.record(0, 3, 11, sample));
            assert!(!monitors.record(0, 4, 11, sample));
            assert!(!monitors.record(0, 3, 13, sample));
            assert!(!monitors.record(1, 3, 11, sample));
        }
        let view = Monitors::new(&table);
        assert_eq!(view.sample(0, 3, 11), Some(sample));
        assert_eq!(view.sample(0, 2, 11), None);
        assert_eq!(view.recorded(0), vec![sample]);
    }

    #[test]
    fn truncated_record_is_rejected() {
        let table = encode_table(&[(0, spec())]).unwrap();
        let cut = &table[..table.len() - WORD];
        assert!(matches!(decode_table(cut), Err(SimError::TruncatedData { .. })));
    }

    #[test]
    fn payload_validates_windows() {
        let bad = MonitorSpec { start_turn: 5, stop_turn: 1, part_id_start: 0, part_id_stop: 1 };
        assert!(MonitorSpec::from_payload(&bad.to_payload()).is_err());
        assert_eq!(MonitorSpec::from_payload(&spec().to_payload()).unwrap(), spec());
    }

    #[test]
    fn oversized_windows_are_malformed_not_overflow() {
        let huge = [
            MonitorSpec { start_turn: 0, stop_turn: i64::MAX, part_id_start: 0, part_id_stop: i64::MAX },
            MonitorSpec { start_turn: 0, stop_turn: 1, part_id_start: i64::MIN, part_id_stop: 0 },
            MonitorSpec { start_turn: 0, stop_turn: 1 << 40, part_id_start: 0, part_id_stop: 1 << 30 },
        ];
        for spec in huge {
            assert!(
                matches!(MonitorSpec::from_payload(&spec.to_payload()), Err(SimError::MalformedLayout { .. })),
                "{spec:?} must be rejected"
            );
            assert!(spec.record_size().is_err());
            assert!(encode_table(&[(0, spec)]).is_err());
        }
    }
}
