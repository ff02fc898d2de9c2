//! Software wall clock and weekly timetable.
//!
//! Advanced by the 1 Hz RTC task and overwritten by radio time sync.
//! Only month lengths and leap years are handled; no DST.
//!
//! The timetable has eight rows of eight switch points: row 0 applies to
//! every day, rows 1..=7 to Monday..Sunday when weekday programs are on.
//! Each entry is `(preset << 12) | minute_of_day`; minutes >= 1440 mark
//! an unused slot.

use crate::app::ports::{ClockPort, ScheduleSource, WallTime};

pub const SLOTS_PER_DAY: usize = 8;
const MINUTES_PER_DAY: u16 = 24 * 60;
const UNUSED: u16 = 0x0FFF;

const fn slot(preset: u16, hour: u16, minute: u16) -> u16 {
    (preset << 12) | (hour * 60 + minute)
}

const DEFAULT_DAY: [u16; SLOTS_PER_DAY] = [
    slot(2, 7, 0),
    slot(1, 9, 0),
    slot(2, 16, 0),
    slot(1, 21, 0),
    0x2000 | UNUSED,
    0x1000 | UNUSED,
    0x2000 | UNUSED,
    0x1000 | UNUSED,
];

/// Switch points for the shared row and the seven weekday rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timetable {
    rows: [[u16; SLOTS_PER_DAY]; 8],
}

impl Default for Timetable {
    fn default() -> Self {
        Self { rows: [DEFAULT_DAY; 8] }
    }
}

impl Timetable {
    /// Row 0 is the shared program, 1..=7 Monday..Sunday.
    pub fn set(&mut self, row: usize, slot: usize, preset: u8, minute_of_day: u16) {
        if let Some(entry) = self.rows.get_mut(row).and_then(|r| r.get_mut(slot)) {
            *entry = (u16::from(preset & 0x03) << 12) | minute_of_day.min(UNUSED);
        }
    }

    pub fn clear(&mut self, row: usize, slot: usize) {
        if let Some(entry) = self.rows.get_mut(row).and_then(|r| r.get_mut(slot)) {
            *entry = (*entry & 0xF000) | UNUSED;
        }
    }

    /// Latest switch point at or before `minute` in `row`.
    fn latest(&self, row: usize, minute: u16) -> Option<u16> {
        self.rows[row]
            .iter()
            .copied()
            .filter(|&e| (e & 0x0FFF) < MINUTES_PER_DAY && (e & 0x0FFF) <= minute)
            .max_by_key(|&e| e & 0x0FFF)
    }

    /// Preset in force at `now`.  With no switch point earlier today the
    /// search continues with the last one of the previous days.
    pub fn preset_at(&self, now: &WallTime, per_day: bool) -> Option<u8> {
        let mut row = if per_day { usize::from(now.weekday()) + 1 } else { 0 };
        let tries = if per_day { 8 } else { 2 };
        let mut minute = now.minute_of_day();
        for _ in 0..tries {
            if let Some(e) = self.latest(row, minute) {
                return Some(((e >> 12) & 0x03) as u8);
            }
            if row > 0 {
                row = (row + 5) % 7 + 1;
            }
            minute = MINUTES_PER_DAY;
        }
        None
    }
}

fn days_in_month(year: u8, month: u8) -> u8 {
    match month {
        2 if year % 4 == 0 => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

#[derive(Debug, Clone, Default)]
pub struct SoftClock {
    now: WallTime,
    timetable: Timetable,
    per_day: bool,
}

impl SoftClock {
    pub fn new(start: WallTime, timetable: Timetable) -> Self {
        Self {
            now: start,
            timetable,
            per_day: false,
        }
    }

    /// Use rows 1..=7 instead of the shared row.
    pub fn set_weekday_programs(&mut self, on: bool) {
        self.per_day = on;
    }

    pub fn timetable_mut(&mut self) -> &mut Timetable {
        &mut self.timetable
    }
}

impl ClockPort for SoftClock {
    fn now(&self) -> WallTime {
        self.now
    }

    fn add_second(&mut self) {
        let t = &mut self.now;
        t.second += 1;
        if t.second < 60 {
            return;
        }
        t.second = 0;
        t.minute += 1;
        if t.minute < 60 {
            return;
        }
        t.minute = 0;
        t.hour += 1;
        if t.hour < 24 {
            return;
        }
        t.hour = 0;
        t.day += 1;
        if t.day <= days_in_month(t.year, t.month) {
            return;
        }
        t.day = 1;
        t.month += 1;
        if t.month <= 12 {
            return;
        }
        t.month = 1;
        t.year = t.year.wrapping_add(1) % 100;
    }

    fn set_time(&mut self, time: WallTime) {
        self.now = time;
    }
}

impl ScheduleSource for SoftClock {
    fn temperature_type(&self, now: &WallTime) -> Option<u8> {
        self.timetable.preset_at(now, self.per_day)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(day: u8, hour: u8, minute: u8) -> WallTime {
        // 2024-01-01 is a Monday.
        WallTime {
            year: 24,
            month: 1,
            day,
            hour,
            minute,
            second: 0,
        }
    }

    #[test]
    fn default_program_follows_switch_points() {
        let clock = SoftClock::default();
        assert_eq!(clock.temperature_type(&at(1, 6, 59)), Some(1), "carried from 21:00 yesterday");
        assert_eq!(clock.temperature_type(&at(1, 7, 0)), Some(2));
        assert_eq!(clock.temperature_type(&at(1, 12, 0)), Some(1));
        assert_eq!(clock.temperature_type(&at(1, 18, 30)), Some(2));
        assert_eq!(clock.temperature_type(&at(1, 23, 0)), Some(1));
    }

    #[test]
    fn weekday_rows_fall_back_to_previous_days() {
        let mut table = Timetable::default();
        for row in 1..=7 {
            for s in 0..SLOTS_PER_DAY {
                table.clear(row, s);
            }
        }
        // Only Saturday has a switch point.
        table.set(6, 0, 3, 8 * 60);
        let mut clock = SoftClock::new(at(1, 0, 0), table);
        clock.set_weekday_programs(true);

        // Monday 2024-01-08 looks back through Sunday to Saturday.
        assert_eq!(clock.temperature_type(&at(8, 10, 0)), Some(3));
        // Saturday before 08:00 wraps around the whole week.
        assert_eq!(clock.temperature_type(&at(6, 7, 0)), Some(3));
    }

    #[test]
    fn empty_table_yields_none() {
        let mut table = Timetable::default();
        for s in 0..SLOTS_PER_DAY {
            table.clear(0, s);
        }
        let clock = SoftClock::new(at(1, 0, 0), table);
        assert_eq!(clock.temperature_type(&at(3, 12, 0)), None);
    }

    #[test]
    fn add_second_rolls_over_year_end() {
        let mut clock = SoftClock::new(
            WallTime {
                year: 23,
                month: 12,
                day: 31,
                hour: 23,
                minute: 59,
                second: 59,
            },
            Timetable::default(),
        );
        clock.add_second();
        assert_eq!(clock.now(), at(1, 0, 0));
    }

    #[test]
    fn leap_day_is_kept() {
        let mut clock = SoftClock::new(
            WallTime {
                year: 24,
                month: 2,
                day: 28,
                hour: 23,
                minute: 59,
                second: 59,
            },
            Timetable::default(),
        );
        clock.add_second();
        assert_eq!((clock.now().month, clock.now().day), (2, 29));
    }
}
