//! Recurrence translation: the server's (type, interval, occurrences|until,
//! dow, dom, wom, moy) tuple (§4.G "Recurrence translation") translated to
//! and from an RFC-5545 RRULE string, plus occurrence expansion via the
//! `rrule` crate (kept from the teacher's `expand_rrule`, generalized to
//! the recurrence types this crate actually produces).
//!
//! `wom` (week-of-month) uses 1..4 for the first through fourth occurrence
//! and 5 for "last", matching the EAS wire convention; RRULE spells the
//! latter `-1`. `dow` is the EAS day-of-week bitmask: Sunday=1, Monday=2,
//! Tuesday=4, Wednesday=8, Thursday=16, Friday=32, Saturday=64.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rrule::RRule;

const DOW_CODES: [(u8, &str); 7] = [
    (1, "SU"),
    (2, "MO"),
    (4, "TU"),
    (8, "WE"),
    (16, "TH"),
    (32, "FR"),
    (64, "SA"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceTuple {
    /// 0=daily, 1=weekly, 2=monthly-by-date, 3=monthly-by-day,
    /// 5=yearly-by-date, 6=yearly-by-day. 4 is reserved/unused on the wire.
    pub rec_type: u8,
    pub interval: u32,
    pub occurrences: Option<u32>,
    pub until: Option<DateTime<Utc>>,
    pub dow: Option<u8>,
    pub dom: Option<u8>,
    pub wom: Option<u8>,
    pub moy: Option<u8>,
}

fn dow_bits_to_byday_set(dow: u8) -> String {
    DOW_CODES
        .iter()
        .filter(|(bit, _)| dow & bit != 0)
        .map(|(_, code)| *code)
        .collect::<Vec<_>>()
        .join(",")
}

fn byday_set_to_dow_bits(s: &str) -> u8 {
    let mut bits = 0u8;
    for part in s.split(',') {
        let code = part.trim_start_matches(|c: char| c == '-' || c.is_ascii_digit());
        if let Some((bit, _)) = DOW_CODES.iter().find(|(_, c)| *c == code) {
            bits |= bit;
        }
    }
    bits
}

fn single_day_code(dow_bit: u8) -> Result<&'static str> {
    DOW_CODES
        .iter()
        .find(|(bit, _)| *bit == dow_bit)
        .map(|(_, c)| *c)
        .ok_or_else(|| anyhow!("dow {} is not a single-day bit", dow_bit))
}

fn single_day_bit(code: &str) -> Result<u8> {
    DOW_CODES
        .iter()
        .find(|(_, c)| *c == code)
        .map(|(bit, _)| *bit)
        .ok_or_else(|| anyhow!("unrecognized BYDAY code {}", code))
}

fn wom_to_rrule_ordinal(wom: u8) -> i32 {
    if wom == 5 {
        -1
    } else {
        wom as i32
    }
}

fn rrule_ordinal_to_wom(ordinal: i32) -> u8 {
    if ordinal < 0 {
        5
    } else {
        ordinal as u8
    }
}

/// Translate a recurrence tuple into an RFC-5545 RRULE string (§4.G).
pub fn tuple_to_rrule(t: &RecurrenceTuple) -> Result<String> {
    let mut s = String::new();
    match t.rec_type {
        0 => {
            s.push_str(&format!("FREQ=DAILY;INTERVAL={}", t.interval));
        }
        1 => {
            s.push_str(&format!("FREQ=WEEKLY;INTERVAL={}", t.interval));
            if let Some(dow) = t.dow {
                s.push_str(&format!(";BYDAY={}", dow_bits_to_byday_set(dow)));
            }
        }
        2 => {
            s.push_str(&format!("FREQ=MONTHLY;INTERVAL={}", t.interval));
            if let Some(dom) = t.dom {
                s.push_str(&format!(";BYMONTHDAY={}", dom));
            }
        }
        3 => {
            s.push_str(&format!("FREQ=MONTHLY;INTERVAL={}", t.interval));
            let ord = wom_to_rrule_ordinal(t.wom.unwrap_or(1));
            let day = single_day_code(t.dow.unwrap_or(0))?;
            s.push_str(&format!(";BYDAY={}{}", ord, day));
        }
        5 => {
            s.push_str(&format!("FREQ=YEARLY;INTERVAL={}", t.interval));
            if let Some(moy) = t.moy {
                s.push_str(&format!(";BYMONTH={}", moy));
            }
            if let Some(dom) = t.dom {
                s.push_str(&format!(";BYMONTHDAY={}", dom));
            }
        }
        6 => {
            s.push_str(&format!("FREQ=YEARLY;INTERVAL={}", t.interval));
            if let Some(moy) = t.moy {
                s.push_str(&format!(";BYMONTH={}", moy));
            }
            let ord = wom_to_rrule_ordinal(t.wom.unwrap_or(1));
            let day = single_day_code(t.dow.unwrap_or(0))?;
            s.push_str(&format!(";BYDAY={}{}", ord, day));
        }
        other => return Err(anyhow!("unsupported recurrence type {}", other)),
    }
    if let Some(until) = t.until {
        s.push_str(&format!(";UNTIL={}", until.format("%Y%m%dT%H%M%SZ")));
    } else if let Some(count) = t.occurrences {
        s.push_str(&format!(";COUNT={}", count));
    }
    Ok(s)
}

/// Inverse of `tuple_to_rrule`. Must be bit-exact for every tuple the
/// translator above can produce (§4.G, §8).
pub fn rrule_to_tuple(rrule_str: &str) -> Result<RecurrenceTuple> {
    let mut freq: Option<&str> = None;
    let mut interval: u32 = 1;
    let mut byday: Option<&str> = None;
    let mut bymonthday: Option<u8> = None;
    let mut bymonth: Option<u8> = None;
    let mut until: Option<DateTime<Utc>> = None;
    let mut count: Option<u32> = None;

    for part in rrule_str.split(';') {
        let (k, v) = part.split_once('=').ok_or_else(|| anyhow!("malformed RRULE part: {}", part))?;
        match k {
            "FREQ" => freq = Some(v),
            "INTERVAL" => interval = v.parse()?,
            "BYDAY" => byday = Some(v),
            "BYMONTHDAY" => bymonthday = Some(v.parse()?),
            "BYMONTH" => bymonth = Some(v.parse()?),
            "UNTIL" => {
                until = Some(
                    DateTime::parse_from_str(&format!("{}+0000", v), "%Y%m%dT%H%M%SZ%z")
                        .map(|d| d.with_timezone(&Utc))?,
                );
            }
            "COUNT" => count = Some(v.parse()?),
            _ => {}
        }
    }

    let freq = freq.ok_or_else(|| anyhow!("RRULE missing FREQ"))?;
    let (rec_type, dow, dom, wom, moy) = match freq {
        "DAILY" => (0u8, None, None, None, None),
        "WEEKLY" => (1, byday.map(byday_set_to_dow_bits), None, None, None),
        "MONTHLY" => {
            if let Some(bd) = byday {
                let (ord_str, code) = split_ordinal_and_day(bd)?;
                let ord: i32 = ord_str.parse()?;
                (3, Some(single_day_bit(code)?), None, Some(rrule_ordinal_to_wom(ord)), None)
            } else {
                (2, None, bymonthday, None, None)
            }
        }
        "YEARLY" => {
            if let Some(bd) = byday {
                let (ord_str, code) = split_ordinal_and_day(bd)?;
                let ord: i32 = ord_str.parse()?;
                (
                    6,
                    Some(single_day_bit(code)?),
                    None,
                    Some(rrule_ordinal_to_wom(ord)),
                    bymonth,
                )
            } else {
                (5, None, bymonthday, None, bymonth)
            }
        }
        other => return Err(anyhow!("unsupported FREQ {}", other)),
    };

    Ok(RecurrenceTuple {
        rec_type,
        interval,
        occurrences: count,
        until,
        dow,
        dom,
        wom,
        moy,
    })
}

fn split_ordinal_and_day(byday: &str) -> Result<(&str, &str)> {
    let split_at = byday
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| anyhow!("BYDAY {} has no day code", byday))?;
    Ok((&byday[..split_at], &byday[split_at..]))
}

/// Expand an RRULE into concrete occurrences between `start`..`end`.
pub fn expand_occurrences(
    dtstart: DateTime<Utc>,
    rrule_str: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let rule = rrule_str.parse::<RRule>()?;
    let all = rule.all(chrono::Utc, Some(dtstart), Some(end))?;
    Ok(all.into_iter().filter(|d| *d >= start && *d <= end).collect())
}
