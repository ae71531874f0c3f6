// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Case, licence and certificate reference formats.
//!
//! Numbers come from a per-prefix, per-year sequence
//! (`ReferenceSequence`); this module only formats them.

use regex::Regex;
use std::sync::LazyLock;

use crate::domain::access::AccessRequestType;
use crate::domain::process::{ProcessError, ProcessKind, ProcessType};

/// Letters used for licence check characters (no I, O or Y).
const CHECK_LETTERS: &[u8; 23] = b"ABCDEFGHJKLMNPQRSTUVWXZ";

static CASE_REFERENCE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(IMA|CA|IAR|EAR)/\d{4}/\d{5,}(/\d+)?$").ok());

/// Sequence prefix for the case reference of a process.
pub fn case_reference_prefix(
    process_type: ProcessType,
    access_type: Option<AccessRequestType>,
) -> Result<&'static str, ProcessError> {
    Ok(match process_type.specific_kind()? {
        ProcessKind::ImportApplication => "IMA",
        ProcessKind::ExportApplication => "CA",
        ProcessKind::AccessRequest => match access_type.map(|t| t.process_type()).unwrap_or(process_type) {
            ProcessType::ExporterAccessRequest => "EAR",
            _ => "IAR",
        },
    })
}

/// `IMA/2024/00042`
pub fn case_reference(prefix: &str, year: i32, sequence: u64) -> String {
    format!("{prefix}/{year}/{sequence:05}")
}

/// Case reference printed on a variation's documents: `IMA/2024/00042/1`.
pub fn variation_case_reference(reference: &str, variation_no: u32) -> String {
    if variation_no == 0 {
        reference.to_string()
    } else {
        format!("{reference}/{variation_no}")
    }
}

pub fn is_case_reference(value: &str) -> bool {
    CASE_REFERENCE.as_ref().is_some_and(|re| re.is_match(value))
}

/// Weighted check letter over the seven digit licence number.
pub fn licence_check_letter(sequence: u64) -> char {
    let digits = format!("{:07}", sequence % 10_000_000);
    let total: u32 = digits
        .bytes()
        .enumerate()
        .map(|(i, d)| u32::from(d - b'0') * (8 - i as u32))
        .sum();
    CHECK_LETTERS[(total % 23) as usize] as char
}

/// Electronic licence sent to CHIEF: `GBSIL0000001C`.
pub fn electronic_licence_reference(chief_prefix: &str, sequence: u64) -> String {
    format!("GB{chief_prefix}{:07}{}", sequence % 10_000_000, licence_check_letter(sequence))
}

/// Paper licence: `24/TEX/0000001C`.
pub fn paper_licence_reference(year: i32, type_code: &str, sequence: u64) -> String {
    format!(
        "{:02}/{type_code}/{:07}{}",
        year.rem_euclid(100),
        sequence % 10_000_000,
        licence_check_letter(sequence)
    )
}

/// Export certificate: `CFS/2024/00007`.
pub fn certificate_reference(type_code: &str, year: i32, sequence: u64) -> String {
    format!("{type_code}/{year}/{sequence:05}")
}
