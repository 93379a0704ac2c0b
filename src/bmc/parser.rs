//! Parses `ipmitool -c sdr` CSV output into [`SensorSample`] values.
//!
//! Line shape: `name,value,unit,status`, e.g. `CPU1 Temp,42,degrees,ok` or
//! `PSU1 Status,0x01,discrete,ok`. Grounded in the teacher's `system/parser.rs`
//! CSV-column-splitting idiom, generalized from its two hardcoded token
//! filters to the full canned-group catalog.

use crate::bmc::envelope::SensorSample;

pub fn parse_sdr_csv(csv: &str) -> Vec<SensorSample> {
    csv.lines()
        .filter_map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Option<SensorSample> {
    let cols: Vec<&str> = line.split(',').collect();
    if cols.len() < 4 {
        return None;
    }
    let name = cols[0].trim().to_string();
    if name.is_empty() {
        return None;
    }
    let raw_value = cols[1].trim();
    let unit = cols[2].trim();
    let status = cols[3].trim().to_ascii_lowercase();

    let discrete = unit.eq_ignore_ascii_case("discrete");
    let percent = unit.starts_with('%');
    let value = if discrete { None } else { raw_value.parse::<f64>().ok() };

    Some(SensorSample {
        name,
        unit: if discrete { String::new() } else { unit.to_string() },
        status,
        value,
        discrete,
        percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_analog_row() {
        let samples = parse_sdr_csv("MB Temp,42,degrees,ok");
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].name, "MB Temp");
        assert_eq!(samples[0].unit, "degrees");
        assert_eq!(samples[0].status, "ok");
        assert_eq!(samples[0].value, Some(42.0));
    }

    #[test]
    fn discrete_row_has_no_unit_or_numeric_value() {
        let samples = parse_sdr_csv("PSU1 Status,0x01,discrete,ok");
        assert_eq!(samples.len(), 1);
        assert!(samples[0].discrete);
        assert_eq!(samples[0].unit, "");
        assert_eq!(samples[0].value, None);
    }

    #[test]
    fn short_rows_are_skipped() {
        let samples = parse_sdr_csv("garbage,row");
        assert!(samples.is_empty());
    }

    #[test]
    fn multiple_rows_parse_independently() {
        let csv = "Fan1,1800,RPM,ok\nMB Temp,42,degrees,ok\n5V Rail,5.02,Volts,ok";
        let samples = parse_sdr_csv(csv);
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].name, "Fan1");
        assert_eq!(samples[2].name, "5V Rail");
    }
}
