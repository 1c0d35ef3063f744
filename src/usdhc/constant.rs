#![allow(unused)]

// USDHC register offsets
pub const USDHC_DS_ADDR: u32 = 0x0000;                  // DMA System Address
pub const USDHC_BLK_ATT: u32 = 0x0004;                  // Block Attributes
pub const USDHC_CMD_ARG: u32 = 0x0008;                  // Command Argument
pub const USDHC_CMD_XFR_TYP: u32 = 0x000C;              // Command Transfer Type
pub const USDHC_CMD_RSP0: u32 = 0x0010;                 // Command Response 0..3
pub const USDHC_CMD_RSP1: u32 = 0x0014;
pub const USDHC_CMD_RSP2: u32 = 0x0018;
pub const USDHC_CMD_RSP3: u32 = 0x001C;
pub const USDHC_DATA_BUFF_ACC_PORT: u32 = 0x0020;       // Data Buffer Access Port
pub const USDHC_PRES_STATE: u32 = 0x0024;               // Present State
pub const USDHC_PROT_CTRL: u32 = 0x0028;                // Protocol Control
pub const USDHC_SYS_CTRL: u32 = 0x002C;                 // System Control
pub const USDHC_INT_STATUS: u32 = 0x0030;               // Interrupt Status
pub const USDHC_INT_STATUS_EN: u32 = 0x0034;            // Interrupt Status Enable
pub const USDHC_INT_SIGNAL_EN: u32 = 0x0038;            // Interrupt Signal Enable
pub const USDHC_AUTOCMD12_ERR_STATUS: u32 = 0x003C;     // Auto CMD12 Error Status / Host Control 2
pub const USDHC_HOST_CTRL_CAP: u32 = 0x0040;            // Host Controller Capabilities
pub const USDHC_WTMK_LVL: u32 = 0x0044;                 // Watermark Level
pub const USDHC_MIX_CTRL: u32 = 0x0048;                 // Mixer Control
pub const USDHC_ADMA_ERR_STATUS: u32 = 0x0054;          // ADMA Error Status
pub const USDHC_ADMA_SYS_ADDR: u32 = 0x0058;            // ADMA System Address
pub const USDHC_CLK_TUNE_CTRL_STATUS: u32 = 0x0068;     // Clock Tuning Control and Status
pub const USDHC_VEND_SPEC: u32 = 0x00C0;                // Vendor Specific
pub const USDHC_VEND_SPEC2: u32 = 0x00C8;               // Vendor Specific 2
pub const USDHC_TUNING_CTRL: u32 = 0x00CC;              // Tuning Control

// PRES_STATE bits
pub const USDHC_PRES_CIHB: u32 = 1 << 0;                // Command inhibit (CMD)
pub const USDHC_PRES_CDIHB: u32 = 1 << 1;               // Command inhibit (DATA)
pub const USDHC_PRES_DLA: u32 = 1 << 2;                 // Data line active
pub const USDHC_PRES_SDSTB: u32 = 1 << 3;               // SD clock stable
pub const USDHC_PRES_WTA: u32 = 1 << 8;                 // Write transfer active
pub const USDHC_PRES_RTA: u32 = 1 << 9;                 // Read transfer active
pub const USDHC_PRES_BWEN: u32 = 1 << 10;               // Buffer write enable
pub const USDHC_PRES_BREN: u32 = 1 << 11;               // Buffer read enable
pub const USDHC_PRES_RTR: u32 = 1 << 12;                // Re-tuning request
pub const USDHC_PRES_TSCD: u32 = 1 << 15;               // Tap select change done
pub const USDHC_PRES_CINST: u32 = 1 << 16;              // Card inserted
pub const USDHC_PRES_CLSL: u32 = 1 << 23;               // CMD line level
pub const USDHC_PRES_DLSL_SHIFT: u32 = 24;              // DAT[7:0] line level
pub const USDHC_PRES_DAT0: u32 = 1 << 24;
pub const USDHC_PRES_DAT1: u32 = 1 << 25;
pub const USDHC_PRES_DAT2: u32 = 1 << 26;
pub const USDHC_PRES_DAT3: u32 = 1 << 27;
pub const USDHC_PRES_DAT0_3: u32 = USDHC_PRES_DAT0 | USDHC_PRES_DAT1 | USDHC_PRES_DAT2 | USDHC_PRES_DAT3;

// INT_STATUS / INT_STATUS_EN / INT_SIGNAL_EN bits
pub const USDHC_INT_CC: u32 = 1 << 0;                   // Command complete
pub const USDHC_INT_TC: u32 = 1 << 1;                   // Transfer complete
pub const USDHC_INT_BGE: u32 = 1 << 2;                  // Block gap event
pub const USDHC_INT_DINT: u32 = 1 << 3;                 // DMA interrupt
pub const USDHC_INT_BWR: u32 = 1 << 4;                  // Buffer write ready
pub const USDHC_INT_BRR: u32 = 1 << 5;                  // Buffer read ready
pub const USDHC_INT_CINS: u32 = 1 << 6;                 // Card insertion
pub const USDHC_INT_CRM: u32 = 1 << 7;                  // Card removal
pub const USDHC_INT_CINT: u32 = 1 << 8;                 // Card interrupt
pub const USDHC_INT_RTE: u32 = 1 << 12;                 // Re-tuning event
pub const USDHC_INT_TP: u32 = 1 << 14;                  // Tuning pass
pub const USDHC_INT_CTOE: u32 = 1 << 16;                // Command timeout error
pub const USDHC_INT_CCE: u32 = 1 << 17;                 // Command CRC error
pub const USDHC_INT_CEBE: u32 = 1 << 18;                // Command end bit error
pub const USDHC_INT_CIE: u32 = 1 << 19;                 // Command index error
pub const USDHC_INT_DTOE: u32 = 1 << 20;                // Data timeout error
pub const USDHC_INT_DCE: u32 = 1 << 21;                 // Data CRC error
pub const USDHC_INT_DEBE: u32 = 1 << 22;                // Data end bit error
pub const USDHC_INT_AC12E: u32 = 1 << 24;               // Auto CMD12 error
pub const USDHC_INT_TNE: u32 = 1 << 26;                 // Tuning error
pub const USDHC_INT_DMAE: u32 = 1 << 28;                // DMA error

pub const USDHC_INT_CMD_ERR: u32 = USDHC_INT_CTOE | USDHC_INT_CCE | USDHC_INT_CEBE | USDHC_INT_CIE;
pub const USDHC_INT_DATA_ERR: u32 = USDHC_INT_DTOE | USDHC_INT_DCE | USDHC_INT_DEBE | USDHC_INT_AC12E;
pub const USDHC_INT_CARD_DETECT: u32 = USDHC_INT_CINS | USDHC_INT_CRM;
pub const USDHC_INT_DATA_FLAGS: u32 = USDHC_INT_TC | USDHC_INT_DINT | USDHC_INT_BWR | USDHC_INT_BRR | USDHC_INT_BGE;
pub const USDHC_INT_ALL: u32 = 0xFFFF_FFFF;

// MIX_CTRL bits
pub const USDHC_MIX_DMAEN: u32 = 1 << 0;
pub const USDHC_MIX_BCEN: u32 = 1 << 1;                 // Block count enable
pub const USDHC_MIX_AC12EN: u32 = 1 << 2;
pub const USDHC_MIX_DDR_EN: u32 = 1 << 3;
pub const USDHC_MIX_DTDSEL: u32 = 1 << 4;               // Data direction: read
pub const USDHC_MIX_MSBSEL: u32 = 1 << 5;               // Multi block
pub const USDHC_MIX_NIBBLE_POS: u32 = 1 << 6;
pub const USDHC_MIX_AC23EN: u32 = 1 << 7;
pub const USDHC_MIX_FBCLK_SEL: u32 = 1 << 25;           // Feedback clock for tuning
pub const USDHC_MIX_XFER_MASK: u32 = USDHC_MIX_DMAEN
    | USDHC_MIX_BCEN
    | USDHC_MIX_AC12EN
    | USDHC_MIX_DTDSEL
    | USDHC_MIX_MSBSEL
    | USDHC_MIX_AC23EN;

// PROT_CTRL fields
pub const USDHC_PROT_DTW_SHIFT: u32 = 1;
pub const USDHC_PROT_DTW_MASK: u32 = 0x3 << USDHC_PROT_DTW_SHIFT;
pub const USDHC_PROT_EMODE_SHIFT: u32 = 4;
pub const USDHC_PROT_EMODE_MASK: u32 = 0x3 << USDHC_PROT_EMODE_SHIFT;
pub const USDHC_PROT_DMASEL_SHIFT: u32 = 8;
pub const USDHC_PROT_DMASEL_MASK: u32 = 0x3 << USDHC_PROT_DMASEL_SHIFT;
pub const USDHC_PROT_SABGREQ: u32 = 1 << 16;            // Stop at block gap request
pub const USDHC_PROT_CREQ: u32 = 1 << 17;               // Continue request
pub const USDHC_PROT_RD_DONE_NO_8CLK: u32 = 1 << 20;
pub const USDHC_PROT_BURST_LEN_EN_SHIFT: u32 = 27;
pub const USDHC_PROT_BURST_LEN_EN_MASK: u32 = 0x7 << USDHC_PROT_BURST_LEN_EN_SHIFT;

pub const USDHC_DTW_1BIT: u32 = 0;
pub const USDHC_DTW_4BIT: u32 = 1;
pub const USDHC_DTW_8BIT: u32 = 2;

pub const USDHC_DMASEL_SIMPLE: u32 = 0;
pub const USDHC_DMASEL_ADMA1: u32 = 1;
pub const USDHC_DMASEL_ADMA2: u32 = 2;

// SYS_CTRL fields
pub const USDHC_SYS_DVS_SHIFT: u32 = 4;
pub const USDHC_SYS_DVS_MASK: u32 = 0xF << USDHC_SYS_DVS_SHIFT;
pub const USDHC_SYS_SDCLKFS_SHIFT: u32 = 8;
pub const USDHC_SYS_SDCLKFS_MASK: u32 = 0xFF << USDHC_SYS_SDCLKFS_SHIFT;
pub const USDHC_SYS_DTOCV_SHIFT: u32 = 16;
pub const USDHC_SYS_DTOCV_MASK: u32 = 0xF << USDHC_SYS_DTOCV_SHIFT;
pub const USDHC_SYS_RSTA: u32 = 1 << 24;                // Software reset for all
pub const USDHC_SYS_RSTC: u32 = 1 << 25;                // Software reset for CMD line
pub const USDHC_SYS_RSTD: u32 = 1 << 26;                // Software reset for DATA line
pub const USDHC_SYS_INITA: u32 = 1 << 27;               // Send 80 initialization clocks
pub const USDHC_SYS_RSTT: u32 = 1 << 28;                // Reset tuning
pub const USDHC_SYS_RESET_MASK: u32 = USDHC_SYS_RSTA | USDHC_SYS_RSTC | USDHC_SYS_RSTD | USDHC_SYS_RSTT;

// AUTOCMD12_ERR_STATUS (host control 2 half)
pub const USDHC_AC12_EXECUTE_TUNING: u32 = 1 << 22;
pub const USDHC_AC12_SMP_CLK_SEL: u32 = 1 << 23;

// HOST_CTRL_CAP fields
pub const USDHC_CAP_SDR50: u32 = 1 << 0;
pub const USDHC_CAP_SDR104: u32 = 1 << 1;
pub const USDHC_CAP_DDR50: u32 = 1 << 2;
pub const USDHC_CAP_RETUNING_SHIFT: u32 = 8;
pub const USDHC_CAP_RETUNING_MASK: u32 = 0xF << USDHC_CAP_RETUNING_SHIFT;
pub const USDHC_CAP_MBL_SHIFT: u32 = 16;
pub const USDHC_CAP_MBL_MASK: u32 = 0x7 << USDHC_CAP_MBL_SHIFT;
pub const USDHC_CAP_ADMAS: u32 = 1 << 20;
pub const USDHC_CAP_HSS: u32 = 1 << 21;
pub const USDHC_CAP_DMAS: u32 = 1 << 22;
pub const USDHC_CAP_SRS: u32 = 1 << 23;
pub const USDHC_CAP_VS33: u32 = 1 << 24;
pub const USDHC_CAP_VS30: u32 = 1 << 25;
pub const USDHC_CAP_VS18: u32 = 1 << 26;

// WTMK_LVL fields
pub const USDHC_WTMK_RD_WML_SHIFT: u32 = 0;
pub const USDHC_WTMK_RD_WML_MASK: u32 = 0xFF << USDHC_WTMK_RD_WML_SHIFT;
pub const USDHC_WTMK_RD_BRST_SHIFT: u32 = 8;
pub const USDHC_WTMK_RD_BRST_MASK: u32 = 0x1F << USDHC_WTMK_RD_BRST_SHIFT;
pub const USDHC_WTMK_WR_WML_SHIFT: u32 = 16;
pub const USDHC_WTMK_WR_WML_MASK: u32 = 0xFF << USDHC_WTMK_WR_WML_SHIFT;
pub const USDHC_WTMK_WR_BRST_SHIFT: u32 = 24;
pub const USDHC_WTMK_WR_BRST_MASK: u32 = 0x1F << USDHC_WTMK_WR_BRST_SHIFT;

// CMD_XFR_TYP fields
pub const USDHC_XFR_RSPTYP_SHIFT: u32 = 16;
pub const USDHC_XFR_RSPTYP_MASK: u32 = 0x3 << USDHC_XFR_RSPTYP_SHIFT;
pub const USDHC_XFR_RSPTYP_NONE: u32 = 0 << USDHC_XFR_RSPTYP_SHIFT;
pub const USDHC_XFR_RSPTYP_136: u32 = 1 << USDHC_XFR_RSPTYP_SHIFT;
pub const USDHC_XFR_RSPTYP_48: u32 = 2 << USDHC_XFR_RSPTYP_SHIFT;
pub const USDHC_XFR_RSPTYP_48_BUSY: u32 = 3 << USDHC_XFR_RSPTYP_SHIFT;
pub const USDHC_XFR_CCCEN: u32 = 1 << 19;               // Command CRC check enable
pub const USDHC_XFR_CICEN: u32 = 1 << 20;               // Command index check enable
pub const USDHC_XFR_DPSEL: u32 = 1 << 21;               // Data present select
pub const USDHC_XFR_CMDTYP_SHIFT: u32 = 22;
pub const USDHC_XFR_CMDTYP_MASK: u32 = 0x3 << USDHC_XFR_CMDTYP_SHIFT;
pub const USDHC_XFR_CMDINX_SHIFT: u32 = 24;
pub const USDHC_XFR_CMDINX_MASK: u32 = 0x3F << USDHC_XFR_CMDINX_SHIFT;

// BLK_ATT fields
pub const USDHC_BLK_SIZE_MASK: u32 = 0x1FFF;
pub const USDHC_BLK_CNT_SHIFT: u32 = 16;
pub const USDHC_MAX_BLOCK_COUNT: u32 = 0xFFFF;
pub const USDHC_MAX_BLOCK_SIZE: u32 = 4096;

// VEND_SPEC / VEND_SPEC2 bits
pub const USDHC_VEND_VSELECT: u32 = 1 << 1;             // 1.8V signalling
pub const USDHC_VEND_FRC_SDCLK_ON: u32 = 1 << 8;
pub const USDHC_VEND2_ACMD23_ARGU2_EN: u32 = 1 << 12;

// TUNING_CTRL fields
pub const USDHC_TUNING_START_TAP_SHIFT: u32 = 0;
pub const USDHC_TUNING_START_TAP_MASK: u32 = 0xFF << USDHC_TUNING_START_TAP_SHIFT;
pub const USDHC_TUNING_STEP_SHIFT: u32 = 16;
pub const USDHC_TUNING_STEP_MASK: u32 = 0x7 << USDHC_TUNING_STEP_SHIFT;
pub const USDHC_TUNING_STD_EN: u32 = 1 << 24;

// CLK_TUNE_CTRL_STATUS fields
pub const USDHC_CLKTUNE_DLY_CELL_SET_PRE_SHIFT: u32 = 8;
pub const USDHC_CLKTUNE_DLY_CELL_SET_PRE_MASK: u32 = 0x7F << USDHC_CLKTUNE_DLY_CELL_SET_PRE_SHIFT;
pub const USDHC_CLKTUNE_NXT_ERR: u32 = 1 << 15;
pub const USDHC_CLKTUNE_PRE_ERR: u32 = 1 << 31;

// Tuning parameters
pub const USDHC_TUNING_START_TAP: u32 = 10;
pub const USDHC_TUNING_STEP: u32 = 2;
pub const USDHC_TUNING_DELAY_US: u32 = 100;
pub const USDHC_TUNING_SETTLE_US: u32 = 1000;

// Voltage switch delays
pub const USDHC_VOLTAGE_SWITCH_SETTLE_US: u32 = 5000;
pub const USDHC_FORCE_CLOCK_US: u32 = 1000;

// Pad strength per bus speed
pub const USDHC_PAD_STRENGTH_HIGH: u32 = 7;
pub const USDHC_PAD_STRENGTH_DEFAULT: u32 = 4;

// ADMA2 descriptor
pub const ADMA2_VALID: u32 = 1 << 0;
pub const ADMA2_END: u32 = 1 << 1;
pub const ADMA2_INT: u32 = 1 << 2;
pub const ADMA2_ACT1: u32 = 1 << 4;
pub const ADMA2_ACT2: u32 = 1 << 5;
pub const ADMA2_XFER: u32 = ADMA2_ACT2 | ADMA2_VALID;
pub const ADMA2_LEN_SHIFT: u32 = 16;
pub const ADMA2_MAX_LEN: u32 = 0xFFFF - 3;
pub const ADMA2_DESC_BYTES: u64 = 8;

// DMA buffer and descriptor table alignment, one cache line
pub const USDHC_DMA_ALIGN: usize = 64;
