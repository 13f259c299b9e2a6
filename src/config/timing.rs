use super::Error;
use serde::{Deserialize, Deserializer, Serialize};

/// DRAM timing parameters of a single tier, in DRAM command clock cycles.
///
/// Either given as individual fields or as a colon separated string,
/// e.g. `nbk=16:CCD=2:RRD=6:RCD=12:RAS=28:RP=12:RC=40:CL=12:WL=4:CDLR=5:WR=12:nbkgrp=1:CCDL=0:RTPL=0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Timing {
    /// Number of banks
    pub nbk: usize,
    /// Column to column delay
    pub t_ccd: u64,
    /// Minimum delay between activation of rows in different banks
    pub t_rrd: u64,
    /// Row to column delay
    pub t_rcd: u64,
    /// Time needed to activate a row
    pub t_ras: u64,
    /// Time needed to precharge a row
    pub t_rp: u64,
    /// Row cycle time
    pub t_rc: u64,
    /// CAS latency
    pub cl: u64,
    /// Write latency
    pub wl: u64,
    /// Last data to read command delay
    pub t_cdlr: u64,
    /// Last data to precharge delay
    pub t_wr: u64,
    /// Number of bank groups
    pub nbkgrp: usize,
    /// Column to column delay within a bank group
    pub t_ccdl: u64,
    /// Read to precharge delay within a bank group
    pub t_rtpl: u64,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            nbk: 16,
            t_ccd: 2,
            t_rrd: 6,
            t_rcd: 12,
            t_ras: 28,
            t_rp: 12,
            t_rc: 40,
            cl: 12,
            wl: 4,
            t_cdlr: 5,
            t_wr: 12,
            nbkgrp: 1,
            t_ccdl: 0,
            t_rtpl: 0,
        }
    }
}

const POSITIONAL_KEYS: [&str; 14] = [
    "nbk", "ccd", "rrd", "rcd", "ras", "rp", "rc", "cl", "wl", "cdlr", "wr", "nbkgrp", "ccdl",
    "rtpl",
];

impl Timing {
    /// Parse timing parameters in the `key=value:...` form.
    ///
    /// Values without a key are assigned in the order `nbk:CCD:RRD:RCD:RAS:RP:RC:CL:WL:CDLR:WR:nbkgrp:CCDL:RTPL`.
    /// Omitted keys keep their default value.
    pub fn parse_accelsim_config(config: impl AsRef<str>) -> Result<Self, Error> {
        let config = config.as_ref();
        let mut timing = Self::default();
        let fields = config
            .split(':')
            .map(str::trim)
            .filter(|field| !field.is_empty());
        for (pos, field) in fields.enumerate() {
            let (key, value) = match field.split_once('=') {
                Some((key, value)) => (key.trim().to_lowercase(), value.trim()),
                None => {
                    let key = POSITIONAL_KEYS
                        .get(pos)
                        .ok_or_else(|| Error::Timing(config.to_string()))?;
                    ((*key).to_string(), field)
                }
            };
            let value: u64 = value
                .parse()
                .map_err(|_| Error::Timing(config.to_string()))?;
            match key.as_str() {
                "nbk" => timing.nbk = value as usize,
                "ccd" => timing.t_ccd = value,
                "rrd" => timing.t_rrd = value,
                "rcd" => timing.t_rcd = value,
                "ras" => timing.t_ras = value,
                "rp" => timing.t_rp = value,
                "rc" => timing.t_rc = value,
                "cl" => timing.cl = value,
                "wl" => timing.wl = value,
                "cdlr" => timing.t_cdlr = value,
                "wr" => timing.t_wr = value,
                "nbkgrp" => timing.nbkgrp = value as usize,
                "ccdl" => timing.t_ccdl = value,
                "rtpl" => timing.t_rtpl = value,
                _ => return Err(Error::Timing(config.to_string())),
            }
        }
        Ok(timing)
    }

    /// Number of banks per bank group.
    #[must_use]
    pub fn banks_per_group(&self) -> usize {
        self.nbk / self.nbkgrp
    }
}

impl std::str::FromStr for Timing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_accelsim_config(s)
    }
}

/// Accepts either the explicit struct or the colon separated string form.
pub fn deserialize<'de, D>(deserializer: D) -> Result<Timing, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Accelsim(String),
        Explicit(Timing),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Accelsim(config) => {
            Timing::parse_accelsim_config(config).map_err(serde::de::Error::custom)
        }
        Repr::Explicit(timing) => Ok(timing),
    }
}

#[cfg(test)]
mod tests {
    use super::Timing;
    use color_eyre::eyre;

    #[test]
    fn parse_keyed_timing() -> eyre::Result<()> {
        let timing = Timing::parse_accelsim_config(
            "nbk=16:CCD=2:RRD=6:RCD=12:RAS=28:RP=12:RC=40:
             CL=12:WL=4:CDLR=5:WR=12:nbkgrp=1:CCDL=0:RTPL=0",
        )?;
        assert_eq!(timing, Timing::default());
        Ok(())
    }

    #[test]
    fn parse_positional_timing() -> eyre::Result<()> {
        let timing = Timing::parse_accelsim_config("4:2:6:12:21:13:34:9:4:5:12:1:0:0")?;
        assert_eq!(timing.nbk, 4);
        assert_eq!(timing.t_ras, 21);
        assert_eq!(timing.t_rp, 13);
        assert_eq!(timing.t_rc, 34);
        assert_eq!(timing.cl, 9);
        assert_eq!(timing.nbkgrp, 1);
        Ok(())
    }

    #[test]
    fn partial_timing_keeps_defaults() -> eyre::Result<()> {
        let timing = Timing::parse_accelsim_config("nbk=8:CL=20")?;
        assert_eq!(timing.nbk, 8);
        assert_eq!(timing.cl, 20);
        assert_eq!(timing.t_rcd, Timing::default().t_rcd);
        Ok(())
    }

    #[test]
    fn reject_unknown_timing_key() {
        assert!(Timing::parse_accelsim_config("nbk=16:FOO=3").is_err());
        assert!(Timing::parse_accelsim_config("nbk=x").is_err());
    }
}
