//! Cold staking: the output template, its verifier and the reserved
//! hot/cold accounts.

pub mod manager;
pub mod script;

pub use manager::{
    ColdStakingInfo, ColdStakingManager, ColdStakingWithdrawalParams, SetupColdStakingParams,
    COLD_WALLET_ACCOUNT_INDEX, COLD_WALLET_ACCOUNT_NAME, HOT_WALLET_ACCOUNT_INDEX,
    HOT_WALLET_ACCOUNT_NAME,
};
pub use script::{ColdStakingScript, ScriptError, SpendPath, OP_CHECKCOLDSTAKEVERIFY};
