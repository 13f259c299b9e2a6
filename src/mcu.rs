use crate::{address, config};
use once_cell::sync::Lazy;
use regex::Regex;

#[must_use]
pub fn mask_limit(mask: address) -> (u8, u8) {
    let mut high = 64;
    let mut low = 0;
    let mut low_found = false;

    for i in 0..64 {
        if (mask & (1u64 << i)) != 0 {
            high = i + 1;
            if !low_found {
                low = i;
                low_found = true;
            }
        }
    }
    (low, high)
}

/// Gather the bits of `val` selected by `mask` into the low bits of the result.
#[must_use]
fn packbits(mask: address, val: address, low: u8, high: u8) -> address {
    let mut pos = 0;
    let mut res: address = 0;
    let low = low.min(64);
    let high = high.min(64);
    for i in low..high {
        if mask & (1u64 << i) != 0 {
            res |= ((val & (1u64 << i)) >> i) << pos;
            pos += 1;
        }
    }
    res
}

/// Inverse of [`packbits`]: scatter the low bits of `val` to the positions selected by `mask`.
#[must_use]
fn unpackbits(mask: address, val: address, low: u8, high: u8) -> address {
    let mut pos = 0;
    let mut res: address = 0;
    let low = low.min(64);
    let high = high.min(64);
    for i in low..high {
        if mask & (1u64 << i) != 0 {
            res |= ((val >> pos) & 1) << i;
            pos += 1;
        }
    }
    res
}

/// Decoded location of an address.
///
/// `chip` and `sub_partition` are global ids across all tiers.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct PhysicalAddress {
    pub tier: usize,
    pub chip: u64,
    pub bank: u64,
    pub row: u64,
    pub col: u64,
    pub burst: u64,
    pub sub_partition: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Config {
    pub addr_chip_start: Option<usize>,

    pub chip: Mask,
    pub bank: Mask,
    pub row: Mask,
    pub col: Mask,
    pub burst: Mask,
}

static ACCELSIM_ADDRESS_DECODE_CONFIG_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(dramid@(?P<dramid>\d+))?;?(?P<rest>.*)").unwrap());

impl Config {
    pub fn parse_accelsim_config(config: impl AsRef<str>) -> Result<Self, config::Error> {
        let mapping = config.as_ref();
        let invalid = |reason: String| config::Error::AddressMapping {
            mapping: mapping.to_string(),
            reason,
        };
        let lowered = mapping.to_lowercase();
        let mut chip_mask = 0x0;
        let mut bank_mask = 0x0;
        let mut row_mask = 0x0;
        let mut col_mask = 0x0;
        let mut burst_mask = 0x0;

        let captures = ACCELSIM_ADDRESS_DECODE_CONFIG_REGEX
            .captures(&lowered)
            .ok_or_else(|| invalid("invalid format".to_string()))?;

        let addr_chip_start: Option<usize> = captures
            .name("dramid")
            .map(|m| m.as_str().parse())
            .transpose()
            .map_err(|err| invalid(format!("bad dram id: {err}")))?;

        let rest = captures
            .name("rest")
            .as_ref()
            .map(regex::Match::as_str)
            .unwrap_or_default();

        let mut offset: i8 = 63;
        for c in rest.chars() {
            if offset < 0 && !matches!(c, '|' | ' ' | '.') {
                return Err(invalid("mapping exceeds 64 bits".to_string()));
            }
            match c {
                'd' => {
                    chip_mask |= 1 << offset;
                    offset -= 1;
                }
                'b' => {
                    bank_mask |= 1 << offset;
                    offset -= 1;
                }
                'r' => {
                    row_mask |= 1 << offset;
                    offset -= 1;
                }
                'c' => {
                    col_mask |= 1 << offset;
                    offset -= 1;
                }
                's' => {
                    burst_mask |= 1 << offset;
                    col_mask |= 1 << offset;
                    offset -= 1;
                }
                '0' => {
                    offset -= 1;
                }
                '|' | ' ' | '.' => {}
                other => return Err(invalid(format!("undefined character {other:?}"))),
            }
        }
        if offset != -1 {
            return Err(invalid(format!(
                "expected length 64 but found {}",
                63 - offset
            )));
        }
        Ok(Self {
            addr_chip_start,
            chip: chip_mask.into(),
            bank: bank_mask.into(),
            row: row_mask.into(),
            col: col_mask.into(),
            burst: burst_mask.into(),
        })
    }
}

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Mask {
    pub mask: address,
    pub low: u8,
    pub high: u8,
}

impl From<address> for Mask {
    fn from(mask: address) -> Self {
        let (low, high) = mask_limit(mask);
        Self { mask, low, high }
    }
}

impl std::fmt::Debug for Mask {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let mut out = f.debug_struct("Mask");
        out.field("mask", &format!("{:016x}", self.mask));
        out.field("low", &self.low);
        out.field("high", &self.high);
        out.finish()
    }
}

impl Mask {
    fn pack(&self, addr: address) -> address {
        packbits(self.mask, addr, self.low, self.high)
    }

    fn unpack(&self, val: address) -> address {
        unpackbits(self.mask, val, self.low, self.high)
    }
}

/// Address decoder of a single memory tier.
///
/// Channel and sub partition ids are offset so that they are unique across tiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemoryControllerUnit {
    pub tier: usize,
    pub num_channels: usize,
    pub num_sub_partitions_per_channel: usize,
    pub channel_offset: usize,
    pub sub_partition_offset: usize,
    decode_config: Config,
    has_gap: bool,
}

impl std::fmt::Display for MemoryControllerUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("MemoryControllerUnit")
            .field("tier", &self.tier)
            .field("num_channels", &self.num_channels)
            .field(
                "num_sub_partitions_per_channel",
                &self.num_sub_partitions_per_channel,
            )
            .finish()
    }
}

impl MemoryControllerUnit {
    pub fn new(
        tier: usize,
        config: &config::Tier,
        channel_offset: usize,
        sub_partition_offset: usize,
    ) -> Result<Self, config::Error> {
        let num_channels = config.num_channels;
        let num_sub_partitions_per_channel = config.num_sub_partitions_per_channel;
        let invalid = |reason: &str| config::Error::AddressMapping {
            mapping: config.address_mapping.clone(),
            reason: reason.to_string(),
        };
        if num_channels == 0 {
            return Err(invalid("no channels"));
        }
        if !num_sub_partitions_per_channel.is_power_of_two() {
            return Err(invalid("sub partitions per channel must be a power of two"));
        }

        let mut num_chip_bits = num_channels.ilog2();
        let gap = num_channels as i64 - i64::from(2u32.pow(num_chip_bits));
        if gap > 0 {
            num_chip_bits += 1;
        }
        let mut decode_config = Config::parse_accelsim_config(&config.address_mapping)?;

        match decode_config.addr_chip_start {
            Some(addr_chip_start) if gap == 0 => {
                // insert the chip bits at ADDR_CHIP_S
                let mask: address = (1 << addr_chip_start as u64) - 1;

                let bank_mask = decode_config.bank.mask;
                decode_config.bank =
                    (((bank_mask & !mask) << num_chip_bits) | (bank_mask & mask)).into();

                let row_mask = decode_config.row.mask;
                decode_config.row =
                    (((row_mask & !mask) << num_chip_bits) | (row_mask & mask)).into();

                let col_mask = decode_config.col.mask;
                decode_config.col =
                    (((col_mask & !mask) << num_chip_bits) | (col_mask & mask)).into();

                let burst_mask = decode_config.burst.mask;
                decode_config.burst =
                    (((burst_mask & !mask) << num_chip_bits) | (burst_mask & mask)).into();

                let mut chip_mask = decode_config.chip.mask;
                for i in addr_chip_start..(addr_chip_start + num_chip_bits as usize) {
                    chip_mask |= 1 << i;
                }
                decode_config.chip = chip_mask.into();
            }
            Some(_) => {
                // the modulo split at ADDR_CHIP_S keeps the masks unchanged
            }
            None => {
                if !num_channels.is_power_of_two() {
                    return Err(invalid(
                        "explicit channel bits require a power of two number of channels",
                    ));
                }
            }
        }

        Ok(Self {
            tier,
            num_channels,
            num_sub_partitions_per_channel,
            channel_offset,
            sub_partition_offset,
            has_gap: gap != 0,
            decode_config,
        })
    }

    #[must_use]
    pub fn decode_config(&self) -> &Config {
        &self.decode_config
    }

    #[must_use]
    pub fn num_sub_partitions(&self) -> usize {
        self.num_channels * self.num_sub_partitions_per_channel
    }

    /// Global ids of the channels of this tier.
    #[must_use]
    pub fn channels(&self) -> std::ops::Range<usize> {
        self.channel_offset..self.channel_offset + self.num_channels
    }

    #[must_use]
    pub fn to_physical_address(&self, addr: address) -> PhysicalAddress {
        let num_channels = self.num_channels as u64;
        let dec = &self.decode_config;

        let mut tlx = PhysicalAddress {
            tier: self.tier,
            ..PhysicalAddress::default()
        };

        let local_chip = match dec.addr_chip_start {
            Some(addr_chip_start) if self.has_gap => {
                // split the address at ADDR_CHIP_S into (MSBs, LSBs):
                // the chip is the modulus of the MSBs, the rest of the address
                // stitches the quotient of the MSBs and the LSBs
                let chip = (addr >> addr_chip_start) % num_channels;
                let mut rest_of_addr = (addr >> addr_chip_start) / num_channels;
                rest_of_addr <<= addr_chip_start;
                rest_of_addr |= addr & ((1 << addr_chip_start) - 1);

                tlx.bank = dec.bank.pack(rest_of_addr);
                tlx.row = dec.row.pack(rest_of_addr);
                tlx.col = dec.col.pack(rest_of_addr);
                tlx.burst = dec.burst.pack(rest_of_addr);
                chip
            }
            _ => {
                tlx.bank = dec.bank.pack(addr);
                tlx.row = dec.row.pack(addr);
                tlx.col = dec.col.pack(addr);
                tlx.burst = dec.burst.pack(addr);
                dec.chip.pack(addr)
            }
        };
        debug_assert!(local_chip < num_channels);

        // the sub partition combines the chip and the lower bits of the bank
        let sub_partition_addr_mask = self.num_sub_partitions_per_channel as u64 - 1;
        let local_sub_partition = local_chip * self.num_sub_partitions_per_channel as u64
            + (tlx.bank & sub_partition_addr_mask);

        tlx.chip = local_chip + self.channel_offset as u64;
        tlx.sub_partition = local_sub_partition + self.sub_partition_offset as u64;
        tlx
    }

    /// Re-derive the linear address of a decoded location.
    ///
    /// Bits not covered by the mapping are lost.
    #[must_use]
    pub fn to_linear_address(&self, tlx: &PhysicalAddress) -> address {
        assert_eq!(
            tlx.tier, self.tier,
            "address/config inconsistency: {tlx:?} decoded by tier {}",
            self.tier
        );
        let dec = &self.decode_config;
        let local_chip = tlx.chip - self.channel_offset as u64;
        let rest = dec.bank.unpack(tlx.bank) | dec.row.unpack(tlx.row) | dec.col.unpack(tlx.col);
        match dec.addr_chip_start {
            Some(addr_chip_start) if self.has_gap => {
                let low_mask = (1 << addr_chip_start) - 1;
                let high = (rest >> addr_chip_start) * self.num_channels as u64 + local_chip;
                (high << addr_chip_start) | (rest & low_mask)
            }
            _ => rest | dec.chip.unpack(local_chip),
        }
    }
}

/// Address decoders of all tiers, with channel and sub partition ids
/// numbered consecutively across tiers.
pub fn for_tiers(
    config: &config::MemorySystem,
) -> Result<Vec<std::sync::Arc<MemoryControllerUnit>>, config::Error> {
    let mut channel_offset = 0;
    let mut sub_partition_offset = 0;
    config
        .tiers
        .iter()
        .enumerate()
        .map(|(tier_id, tier)| {
            let mcu = MemoryControllerUnit::new(tier_id, tier, channel_offset, sub_partition_offset)?;
            channel_offset += tier.num_channels;
            sub_partition_offset += tier.num_sub_partitions();
            Ok(std::sync::Arc::new(mcu))
        })
        .collect()
}
