#![allow(unused)]

// SD card command indices
pub const SD_GO_IDLE_STATE: u32 = 0;
pub const SD_ALL_SEND_CID: u32 = 2;
pub const SD_SEND_RELATIVE_ADDR: u32 = 3;
pub const SD_APP_SET_BUS_WIDTH: u32 = 6;         // ACMD6
pub const SD_SWITCH: u32 = 6;                    // CMD6
pub const SD_SELECT_CARD: u32 = 7;
pub const SD_SEND_IF_COND: u32 = 8;
pub const SD_SEND_CSD: u32 = 9;
pub const SD_VOLTAGE_SWITCH: u32 = 11;
pub const SD_STOP_TRANSMISSION: u32 = 12;
pub const SD_SEND_STATUS: u32 = 13;
pub const SD_SET_BLOCKLEN: u32 = 16;
pub const SD_READ_SINGLE_BLOCK: u32 = 17;
pub const SD_READ_MULTIPLE_BLOCK: u32 = 18;
pub const SD_SEND_TUNING_BLOCK: u32 = 19;
pub const SD_SET_BLOCK_COUNT: u32 = 23;
pub const SD_WRITE_SINGLE_BLOCK: u32 = 24;
pub const SD_WRITE_MULTIPLE_BLOCK: u32 = 25;
pub const SD_APP_SEND_OP_COND: u32 = 41;         // ACMD41
pub const SD_APP_SEND_SCR: u32 = 51;             // ACMD51
pub const SD_APP_CMD: u32 = 55;

// OCR register bits
pub const SD_OCR_VDD_29_30: u32 = 1 << 17;
pub const SD_OCR_VDD_30_31: u32 = 1 << 18;
pub const SD_OCR_VDD_32_33: u32 = 1 << 20;
pub const SD_OCR_VDD_33_34: u32 = 1 << 21;
pub const SD_OCR_SWITCH_18_REQ: u32 = 1 << 24;   // S18R in argument
pub const SD_OCR_SWITCH_18_ACCEPT: u32 = 1 << 24; // S18A in response
pub const SD_OCR_HOST_CAP: u32 = 1 << 30;        // HCS in argument
pub const SD_OCR_CARD_CAP: u32 = 1 << 30;        // CCS in response
pub const SD_OCR_PWR_BUSY: u32 = 1 << 31;        // 0 while the card is still powering up

// CMD8 argument: 2.7-3.6V supply plus check pattern
pub const SD_IF_COND_VHS: u32 = 1 << 8;
pub const SD_IF_COND_CHECK_PATTERN: u32 = 0xAA;
pub const SD_IF_COND_ARG: u32 = SD_IF_COND_VHS | SD_IF_COND_CHECK_PATTERN;

// R1 card status error bits
pub const SD_R1_OUT_OF_RANGE: u32 = 1 << 31;
pub const SD_R1_ADDRESS_ERROR: u32 = 1 << 30;
pub const SD_R1_BLOCK_LEN_ERROR: u32 = 1 << 29;
pub const SD_R1_ERASE_SEQ_ERROR: u32 = 1 << 28;
pub const SD_R1_ERASE_PARAM: u32 = 1 << 27;
pub const SD_R1_WP_VIOLATION: u32 = 1 << 26;
pub const SD_R1_LOCK_UNLOCK_FAILED: u32 = 1 << 24;
pub const SD_R1_COM_CRC_ERROR: u32 = 1 << 23;
pub const SD_R1_ILLEGAL_COMMAND: u32 = 1 << 22;
pub const SD_R1_CARD_ECC_FAILED: u32 = 1 << 21;
pub const SD_R1_CC_ERROR: u32 = 1 << 20;
pub const SD_R1_ERROR: u32 = 1 << 19;
pub const SD_R1_CSD_OVERWRITE: u32 = 1 << 16;
pub const SD_R1_WP_ERASE_SKIP: u32 = 1 << 15;
pub const SD_R1_CARD_ECC_DISABLED: u32 = 1 << 14;
pub const SD_R1_ERASE_RESET: u32 = 1 << 13;
pub const SD_R1_READY_FOR_DATA: u32 = 1 << 8;
pub const SD_R1_APP_CMD: u32 = 1 << 5;
pub const SD_R1_AKE_SEQ_ERROR: u32 = 1 << 3;

pub const SD_R1_CURRENT_STATE_SHIFT: u32 = 9;
pub const SD_R1_CURRENT_STATE_MASK: u32 = 0xF << SD_R1_CURRENT_STATE_SHIFT;
pub const SD_R1_STATE_TRAN: u32 = 4;

pub const SD_R1_ALL_ERRORS: u32 = SD_R1_OUT_OF_RANGE
    | SD_R1_ADDRESS_ERROR
    | SD_R1_BLOCK_LEN_ERROR
    | SD_R1_ERASE_SEQ_ERROR
    | SD_R1_ERASE_PARAM
    | SD_R1_WP_VIOLATION
    | SD_R1_LOCK_UNLOCK_FAILED
    | SD_R1_COM_CRC_ERROR
    | SD_R1_ILLEGAL_COMMAND
    | SD_R1_CARD_ECC_FAILED
    | SD_R1_CC_ERROR
    | SD_R1_ERROR
    | SD_R1_CSD_OVERWRITE
    | SD_R1_WP_ERASE_SKIP
    | SD_R1_ERASE_RESET
    | SD_R1_AKE_SEQ_ERROR;

// R6 (published RCA) status bits: 23, 22, 19 and 15..0 are remapped
pub const SD_R6_ALL_ERRORS: u32 = (1 << 15) | (1 << 14) | (1 << 13);

// CMD6 switch function
pub const SD_SWITCH_MODE_CHECK: u32 = 0;
pub const SD_SWITCH_MODE_SET: u32 = 1 << 31;
pub const SD_SWITCH_ARG_DEFAULT: u32 = 0x00FF_FFFF;
pub const SD_SWITCH_STATUS_BYTES: usize = 64;

pub const SD_GROUP_TIMING_MODE: u32 = 0;
pub const SD_GROUP_COMMAND_SYSTEM: u32 = 1;
pub const SD_GROUP_DRIVER_STRENGTH: u32 = 2;
pub const SD_GROUP_CURRENT_LIMIT: u32 = 3;

// Card command class: switch function
pub const SD_CCC_SWITCH: u32 = 1 << 10;

// ACMD6 argument for 4-bit bus
pub const SD_BUS_WIDTH_1BIT: u32 = 0;
pub const SD_BUS_WIDTH_4BIT: u32 = 2;

// SCR bus widths field
pub const SD_SCR_BUS_WIDTH_1BIT: u32 = 1 << 0;
pub const SD_SCR_BUS_WIDTH_4BIT: u32 = 1 << 2;

// SCR CMD_SUPPORT field
pub const SD_SCR_CMD20_SUPPORT: u32 = 1 << 0;
pub const SD_SCR_CMD23_SUPPORT: u32 = 1 << 1;

pub const SD_SCR_BYTES: usize = 8;
pub const SD_BLOCK_SIZE: u32 = 512;
pub const SD_TUNING_BLOCK_SIZE: u32 = 64;

// Bus clock rates
pub const SD_CLOCK_400KHZ: u32 = 400_000;
pub const SD_CLOCK_25MHZ: u32 = 25_000_000;
pub const SD_CLOCK_50MHZ: u32 = 50_000_000;
pub const SD_CLOCK_100MHZ: u32 = 100_000_000;
pub const SD_CLOCK_208MHZ: u32 = 208_000_000;

// SD physical layer versions (SCR SD_SPEC / SD_SPEC3)
pub const SD_SPEC_VERSION_1_0: u32 = 1 << 0;
pub const SD_SPEC_VERSION_1_1: u32 = 1 << 1;
pub const SD_SPEC_VERSION_2_0: u32 = 1 << 2;
pub const SD_SPEC_VERSION_3_0: u32 = 1 << 3;
