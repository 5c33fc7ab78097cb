//! Hour-block grouping and validation.

use crate::report::ReportRow;
use crate::ImportError;

pub const QUARTER_HOURS_PER_HOUR: usize = 4;
const MINUTES_PER_QUARTER: u32 = 15;

/// Checks that four rows form one clock hour: identical `dd.mm.yyyy HH`
/// prefix and start minutes `00, 15, 30, 45` in that order.
pub fn validate_hour_block(hour_block: &[ReportRow]) -> bool {
    if hour_block.len() != QUARTER_HOURS_PER_HOUR {
        return false;
    }

    let mut first_prefix = None;
    for (index, row) in hour_block.iter().enumerate() {
        let Some((prefix, suffix)) = row.start_time().split_once(':') else {
            return false;
        };
        let first = *first_prefix.get_or_insert(prefix);
        if prefix != first {
            return false;
        }
        match suffix.parse::<u32>() {
            Ok(minute) if minute == index as u32 * MINUTES_PER_QUARTER => {}
            _ => return false,
        }
    }

    true
}

pub fn validate_report_length(rows: usize) -> Result<(), ImportError> {
    if rows % QUARTER_HOURS_PER_HOUR != 0 {
        return Err(ImportError::CorruptReport(format!(
            "report has {rows} quarter-hour rows, which is not a multiple of {QUARTER_HOURS_PER_HOUR}; \
             every hour needs exactly 4 values"
        )));
    }
    Ok(())
}

/// Splits `rows` into validated hour blocks. Fails on the first invalid block.
pub fn hour_blocks(rows: &[ReportRow]) -> Result<Vec<&[ReportRow]>, ImportError> {
    validate_report_length(rows.len())?;

    rows.chunks(QUARTER_HOURS_PER_HOUR)
        .enumerate()
        .map(|(block_idx, block)| {
            if validate_hour_block(block) {
                Ok(block)
            } else {
                Err(ImportError::CorruptReport(format!(
                    "invalid hour block at row {}: start times must be xx:00, xx:15, xx:30, xx:45 \
                     within one hour (got {})",
                    block_idx * QUARTER_HOURS_PER_HOUR + 1,
                    block
                        .iter()
                        .map(ReportRow::start_time)
                        .collect::<Vec<_>>()
                        .join(", ")
                )))
            }
        })
        .collect()
}
