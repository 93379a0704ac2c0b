//! The immutable canned-group catalog (§3) that a raw BMC sample's unit string
//! resolves against when a model is learned from live readings.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CannedGroup {
    Fans,
    Temperature,
    Voltage,
    Power,
    Usage,
    /// Sentinel: samples that resolve here are dropped, not grouped.
    Null,
}

impl CannedGroup {
    pub fn name(self) -> &'static str {
        match self {
            CannedGroup::Fans => "fans",
            CannedGroup::Temperature => "temperature",
            CannedGroup::Voltage => "voltage",
            CannedGroup::Power => "power",
            CannedGroup::Usage => "usage",
            CannedGroup::Null => "null",
        }
    }

    /// Resolve a sample's BMC unit string (and, for discrete/percent special
    /// cases, its name) to a canned group, per §3's catalog and special-case
    /// translation rules.
    pub fn resolve(unit: &str, sample_name: &str, is_discrete: bool, is_percent: bool) -> CannedGroup {
        if is_discrete {
            if sample_name.contains("PSU") {
                return CannedGroup::Power;
            }
            if sample_name.contains("MB Thermal Trip") || sample_name.contains("PCH Thermal Trip") {
                return CannedGroup::Temperature;
            }
        }
        if is_percent {
            if sample_name.contains("Fan") {
                return CannedGroup::Fans;
            }
            if sample_name.contains("Usage") {
                return CannedGroup::Usage;
            }
        }
        match unit {
            "RPM" | "% RPM" | "CFM" | "% CFM" => CannedGroup::Fans,
            "degrees" => CannedGroup::Temperature,
            "Volts" => CannedGroup::Voltage,
            "Amps" | "Watts" | "Joules" | "Coulombs" | "VA" | "VAh" => CannedGroup::Power,
            "" => CannedGroup::Null,
            _ => CannedGroup::Null,
        }
    }

    pub fn is_null(self) -> bool {
        matches!(self, CannedGroup::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_units_resolve_to_expected_groups() {
        assert_eq!(CannedGroup::resolve("RPM", "Fan1", false, false), CannedGroup::Fans);
        assert_eq!(CannedGroup::resolve("degrees", "MB Temp", false, false), CannedGroup::Temperature);
        assert_eq!(CannedGroup::resolve("Volts", "5V Rail", false, false), CannedGroup::Voltage);
        assert_eq!(CannedGroup::resolve("Watts", "System Power", false, false), CannedGroup::Power);
    }

    #[test]
    fn discrete_psu_redirects_to_power() {
        assert_eq!(CannedGroup::resolve("", "PSU1 Status", true, false), CannedGroup::Power);
    }

    #[test]
    fn discrete_thermal_trip_redirects_to_temperature() {
        assert_eq!(CannedGroup::resolve("", "MB Thermal Trip", true, false), CannedGroup::Temperature);
        assert_eq!(CannedGroup::resolve("", "PCH Thermal Trip", true, false), CannedGroup::Temperature);
    }

    #[test]
    fn percent_fan_and_usage_redirect() {
        assert_eq!(CannedGroup::resolve("%", "Fan1 Duty", false, true), CannedGroup::Fans);
        assert_eq!(CannedGroup::resolve("%", "CPU Usage", false, true), CannedGroup::Usage);
    }

    #[test]
    fn empty_unit_is_null() {
        assert!(CannedGroup::resolve("", "Mystery", false, false).is_null());
    }
}
