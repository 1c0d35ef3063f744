use log::debug;

use crate::err::SdError;

use super::{aux::Timeout, constant::*, Board, RegisterPort, UsdhcHost};

const USDHC_MAX_DVS: u32 = 16;
const USDHC_MAX_CLKFS: u32 = 256;

/// Split of the SD clock divider into the DVS and SDCLKFS fields.
///
/// `divisor` is 1..=16 and `prescaler` a power of two up to 256. Both are
/// zero for the DDR pass-through case, where the controller itself halves
/// the base clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockDivider {
    pub divisor: u32,
    pub prescaler: u32,
}

impl ClockDivider {
    pub fn achieved_hz(&self, src_hz: u32) -> u32 {
        if self.divisor == 0 || self.prescaler == 0 {
            return src_hz;
        }
        src_hz / (self.divisor * self.prescaler)
    }

    // SYS_CTRL DVS and SDCLKFS field values
    fn sys_ctrl_bits(&self) -> u32 {
        let dvs = self.divisor.saturating_sub(1);
        let sdclkfs = self.prescaler >> 1;
        ((dvs << USDHC_SYS_DVS_SHIFT) & USDHC_SYS_DVS_MASK)
            | ((sdclkfs << USDHC_SYS_SDCLKFS_SHIFT) & USDHC_SYS_SDCLKFS_MASK)
    }
}

/// Find the divisor/prescaler pair whose output never exceeds `target_hz`.
pub fn compute_divider(src_hz: u32, target_hz: u32) -> Result<ClockDivider, SdError> {
    if src_hz == 0 || target_hz == 0 {
        return Err(SdError::InvalidArgument);
    }

    // DDR pass-through
    if target_hz > src_hz {
        return Ok(ClockDivider { divisor: 0, prescaler: 0 });
    }

    let total = src_hz.div_ceil(target_hz);
    if total > USDHC_MAX_DVS * USDHC_MAX_CLKFS {
        return Err(SdError::UnsupportedClock);
    }

    if total <= USDHC_MAX_DVS {
        // The prescaler alone can only produce powers of two
        return Ok(if total.is_power_of_two() {
            ClockDivider { divisor: 1, prescaler: total }
        } else {
            ClockDivider { divisor: total, prescaler: 1 }
        });
    }

    let mut prescaler = total.div_ceil(USDHC_MAX_DVS).next_power_of_two().max(2);
    let mut divisor = total.div_ceil(prescaler);
    while divisor > USDHC_MAX_DVS {
        prescaler <<= 1;
        if prescaler > USDHC_MAX_CLKFS {
            return Err(SdError::UnsupportedClock);
        }
        divisor = total.div_ceil(prescaler);
    }

    Ok(ClockDivider { divisor, prescaler })
}

impl<P: RegisterPort, B: Board> UsdhcHost<P, B> {
    /// Program the card clock and wait for it to settle. Returns the
    /// frequency actually produced.
    pub fn set_sd_clock(&mut self, target_hz: u32) -> Result<u32, SdError> {
        let src_hz = self.board.source_clock_hz();
        let div = compute_divider(src_hz, target_hz)?;

        self.modify_reg(
            USDHC_SYS_CTRL,
            USDHC_SYS_DVS_MASK | USDHC_SYS_SDCLKFS_MASK,
            div.sys_ctrl_bits(),
        );

        // Wait until the SD clock is stable
        let mut timeout = Timeout::new(self.config.poll.clock_stable, SdError::Timeout);
        while self.read_reg(USDHC_PRES_STATE) & USDHC_PRES_SDSTB == 0 {
            timeout.tick()?;
        }

        let achieved = div.achieved_hz(src_hz);
        debug!(
            "SD clock: src {} Hz target {} Hz -> divisor {} prescaler {} ({} Hz)",
            src_hz, target_hz, div.divisor, div.prescaler, achieved
        );
        self.bus_clock_hz = achieved;
        Ok(achieved)
    }

    /// DDR doubles the data rate, so the prescaler is halved on enable and
    /// restored on disable.
    pub(crate) fn enable_ddr_mode(&self, enable: bool, nibble_pos: bool) {
        let mut prescaler =
            (self.read_reg(USDHC_SYS_CTRL) & USDHC_SYS_SDCLKFS_MASK) >> USDHC_SYS_SDCLKFS_SHIFT;

        if enable {
            let mut mix = self.read_reg(USDHC_MIX_CTRL) & !USDHC_MIX_NIBBLE_POS;
            mix |= USDHC_MIX_DDR_EN;
            if nibble_pos {
                mix |= USDHC_MIX_NIBBLE_POS;
            }
            self.write_reg(USDHC_MIX_CTRL, mix);
            prescaler >>= 1;
        } else {
            self.clear_bits(USDHC_MIX_CTRL, USDHC_MIX_DDR_EN);
            if prescaler == 0 {
                prescaler = 1;
            } else {
                prescaler <<= 1;
            }
        }

        self.modify_reg(
            USDHC_SYS_CTRL,
            USDHC_SYS_SDCLKFS_MASK,
            prescaler << USDHC_SYS_SDCLKFS_SHIFT,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(src: u32, target: u32) {
        let div = compute_divider(src, target).unwrap();
        assert!((1..=16).contains(&div.divisor), "divisor {:?} for {} / {}", div, src, target);
        assert!(div.prescaler.is_power_of_two() && div.prescaler <= 256);
        assert!(div.achieved_hz(src) <= target, "{:?} overshoots {}", div, target);
    }

    #[test]
    fn achieved_clock_never_exceeds_target() {
        let sources = [24_000_000, 198_000_000, 200_000_000, 396_000_000, 400_000_000];
        for &src in sources.iter() {
            let mut target = src;
            while target >= src / 4096 + 1 && target > 0 {
                check(src, target);
                target = target * 7 / 8;
            }
            for &t in [400_000, 25_000_000, 50_000_000, 100_000_000].iter() {
                if t <= src && src.div_ceil(t) <= 4096 {
                    check(src, t);
                }
            }
        }
    }

    #[test]
    fn identification_clock_from_200mhz() {
        // 200 MHz / 400 kHz = 500 = 16 * 32 > 500
        let div = compute_divider(200_000_000, 400_000).unwrap();
        assert_eq!(div, ClockDivider { divisor: 16, prescaler: 32 });
        assert_eq!(div.achieved_hz(200_000_000), 390_625);
    }

    #[test]
    fn small_ratios_prefer_prescaler_for_powers_of_two() {
        assert_eq!(
            compute_divider(200_000_000, 50_000_000).unwrap(),
            ClockDivider { divisor: 1, prescaler: 4 }
        );
        assert_eq!(
            compute_divider(200_000_000, 25_000_000).unwrap(),
            ClockDivider { divisor: 1, prescaler: 8 }
        );
        assert_eq!(
            compute_divider(150_000_000, 50_000_000).unwrap(),
            ClockDivider { divisor: 3, prescaler: 1 }
        );
        assert_eq!(
            compute_divider(120_000_000, 20_000_000).unwrap(),
            ClockDivider { divisor: 6, prescaler: 1 }
        );
    }

    #[test]
    fn equal_rates_divide_by_one() {
        assert_eq!(
            compute_divider(100_000_000, 100_000_000).unwrap(),
            ClockDivider { divisor: 1, prescaler: 1 }
        );
    }

    #[test]
    fn target_above_source_is_ddr_pass_through() {
        let div = compute_divider(198_000_000, 208_000_000).unwrap();
        assert_eq!(div, ClockDivider { divisor: 0, prescaler: 0 });
        assert_eq!(div.achieved_hz(198_000_000), 198_000_000);
    }

    #[test]
    fn unreachable_ratio_is_rejected() {
        assert_eq!(compute_divider(400_000_000, 1000), Err(SdError::UnsupportedClock));
        assert_eq!(compute_divider(0, 1000), Err(SdError::InvalidArgument));
        assert_eq!(compute_divider(1000, 0), Err(SdError::InvalidArgument));
    }

    #[test]
    fn register_encoding() {
        let div = ClockDivider { divisor: 16, prescaler: 32 };
        assert_eq!(div.sys_ctrl_bits(), (15 << USDHC_SYS_DVS_SHIFT) | (16 << USDHC_SYS_SDCLKFS_SHIFT));
        let div = ClockDivider { divisor: 1, prescaler: 1 };
        assert_eq!(div.sys_ctrl_bits(), 0);
    }
}
