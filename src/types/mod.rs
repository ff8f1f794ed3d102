pub use self::{
    ledger_event::Ledger_Event,
    requests::{
        Deposit_Account_Request, Deposit_Request, Oracle_Init, Oracle_Update,
        Reward_Setting_Request, Withdraw_Destination, Withdraw_Request,
    },
};

mod ledger_event;
mod requests;
