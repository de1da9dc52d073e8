//! Identifier constants used on the wire

/// Frame ID constants (byte 2 of every frame)
pub mod frame_id {
    pub const GET_MOD_INFO: u8 = 1;
    pub const MOD_INFO_RESP: u8 = 2;
    pub const SET_DATA_COMPONENTS: u8 = 3;
    pub const GET_DATA: u8 = 4;
    pub const DATA_RESP: u8 = 5;
    pub const SET_CONFIG: u8 = 6;
    pub const GET_CONFIG: u8 = 7;
    pub const CONFIG_RESP: u8 = 8;
    pub const SAVE: u8 = 9;
    pub const START_CAL: u8 = 10;
    pub const STOP_CAL: u8 = 11;
    pub const SET_PARAM: u8 = 12;
    pub const GET_PARAM: u8 = 13;
    pub const PARAM_RESP: u8 = 14;
    pub const SAVE_DONE: u8 = 16;
    pub const USER_CAL_SAMP_COUNT: u8 = 17;
    pub const USER_CAL_SCORE: u8 = 18;
    pub const SET_CONFIG_DONE: u8 = 19;
    pub const SET_PARAM_DONE: u8 = 20;
    pub const FACTORY_MAG_CAL: u8 = 29;
    pub const FACTORY_MAG_CAL_DONE: u8 = 30;
    pub const TAKE_USER_CAL_SAMPLE: u8 = 31;
    pub const FACTORY_ACCEL_CAL: u8 = 36;
    pub const FACTORY_ACCEL_CAL_DONE: u8 = 37;
}

/// Configuration identifiers for SetConfig / GetConfig / ConfigResp
pub mod config_id {
    /// f32, degrees
    pub const DECLINATION: u8 = 1;
    /// bool
    pub const USER_CAL_STABLE_CHECK: u8 = 11;
    /// u32
    pub const USER_CAL_NUM_POINTS: u8 = 12;
    /// bool
    pub const USER_CAL_AUTO_SAMPLING: u8 = 13;
}

/// Data component identifiers carried in DataResp
pub mod component_id {
    /// f32, degrees
    pub const HEADING: u8 = 5;
    /// bool
    pub const DISTORTION: u8 = 8;
    /// bool
    pub const CAL_STATUS: u8 = 9;
    /// f32, degrees
    pub const PITCH: u8 = 24;
    /// f32, degrees
    pub const ROLL: u8 = 25;

    /// Components requested by SetDataComponents, in response order
    pub const ORIENTATION: [u8; 5] = [HEADING, PITCH, ROLL, DISTORTION, CAL_STATUS];
}

/// Parameter identifiers for SetParam / GetParam
pub mod param_id {
    pub const FIR_FILTER: u8 = 3;
    /// Axis selector that accompanies the FIR filter parameter
    pub const FIR_AXIS: u8 = 1;
}

/// Calibration modes accepted by StartCal
pub mod cal_mode {
    pub const FULL_RANGE: u32 = 10;
    pub const MAG_AND_ACCEL: u32 = 110;
}
