//! Consolidated database models
//!
//! Ledger entity structs organized by domain sections. Enum-valued
//! columns are stored as text and parsed through the enums below.

use std::{fmt, io, str::FromStr};

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::Error;

// =============================================================================
// ACCOUNT DOMAIN
// =============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub sticks: i32,
    pub is_blocked: bool,
    pub referrer_id: Option<i64>,
    pub total_referrals: i32,
    pub referral_reward: BigDecimal,
    pub last_reward_date: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Result<Role, Error> {
        Ok(Role::from_str(&self.role)?)
    }

    pub fn ensure_capability(&self, capability: Capability) -> Result<(), Error> {
        if self.role()?.can(capability) {
            return Ok(());
        }

        Err(Error::Forbidden(format!(
            "user {} with role {} cannot {}",
            self.id, self.role, capability
        )))
    }

    pub fn ensure_active(&self) -> Result<(), Error> {
        if self.is_blocked {
            return Err(Error::AccountBlocked(self.id));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Balance {
    pub user_id: i64,
    pub balance: BigDecimal,
    pub crypto_balance: BigDecimal,
    pub rewards: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Token_Holding {
    pub id: i64,
    pub user_id: i64,
    pub crypto_name: String,
    pub amount: BigDecimal,
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// LEDGER DOMAIN
// =============================================================================

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Wallet_Transaction {
    pub id: Option<i64>,
    pub user_id: i64,
    pub confirm_by: Option<i64>,
    pub amount: BigDecimal,
    pub currency: String,
    pub transaction_type: String,
    pub transaction_completed: bool,
    pub transaction_failed: bool,
    pub account_name: Option<String>,
    pub account_number: Option<String>,
    pub crypto_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Wallet_Transaction {
    pub fn kind(&self) -> Result<Transaction_Type, Error> {
        Ok(Transaction_Type::from_str(&self.transaction_type)?)
    }
}

/// The ledger row an engine operation implies, before it is bound to a
/// user and written.
#[derive(Debug, Clone, PartialEq)]
pub struct Ledger_Entry {
    pub kind: Transaction_Type,
    pub amount: BigDecimal,
    pub completed: bool,
}

impl Ledger_Entry {
    pub fn completed(kind: Transaction_Type, amount: BigDecimal) -> Self {
        Self {
            kind,
            amount,
            completed: true,
        }
    }

    pub fn pending(kind: Transaction_Type, amount: BigDecimal) -> Self {
        Self {
            kind,
            amount,
            completed: false,
        }
    }

    pub fn reflected(&self) -> bool {
        self.kind.reflected_in_balance(self.completed)
    }

    pub fn to_row(
        &self,
        user_id: i64,
        currency: &str,
        confirm_by: Option<i64>,
        at: DateTime<Utc>,
    ) -> Wallet_Transaction {
        Wallet_Transaction {
            id: None,
            user_id,
            confirm_by,
            amount: self.amount.clone(),
            currency: currency.to_owned(),
            transaction_type: self.kind.to_string(),
            transaction_completed: self.completed,
            transaction_failed: false,
            account_name: None,
            account_number: None,
            crypto_address: None,
            created_at: at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transaction_Type {
    Deposit,
    Withdraw(String),
    Reward,
    Transfer,
    Refund,
}

/// Stored type prefix of every withdrawal row, `withdraw+<method>`.
pub const WITHDRAW_TYPE: &str = "withdraw";

impl Transaction_Type {
    /// Whether a row of this type with the given completion flag has
    /// already been applied to the cached balance. Withdrawals debit at
    /// request time, every other entry is written already completed.
    /// `Table<Wallet_Transaction>::get_ledger_balance` filters on the
    /// same rule through [`WITHDRAW_TYPE`].
    pub fn reflected_in_balance(&self, completed: bool) -> bool {
        match self {
            Transaction_Type::Withdraw(_) => true,
            _ => completed,
        }
    }
}

impl fmt::Display for Transaction_Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Transaction_Type::Deposit => write!(f, "deposit"),
            Transaction_Type::Withdraw(method) if method.is_empty() => {
                write!(f, "{}", WITHDRAW_TYPE)
            },
            Transaction_Type::Withdraw(method) => {
                write!(f, "{}+{}", WITHDRAW_TYPE, method)
            },
            Transaction_Type::Reward => write!(f, "reward"),
            Transaction_Type::Transfer => write!(f, "transfer"),
            Transaction_Type::Refund => write!(f, "refund"),
        }
    }
}

impl From<Transaction_Type> for String {
    fn from(value: Transaction_Type) -> Self {
        value.to_string()
    }
}

impl FromStr for Transaction_Type {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Transaction_Type, Self::Err> {
        match value {
            "deposit" => Ok(Transaction_Type::Deposit),
            "reward" => Ok(Transaction_Type::Reward),
            "transfer" => Ok(Transaction_Type::Transfer),
            "refund" => Ok(Transaction_Type::Refund),
            _ => match value
                .strip_prefix("withdrawal")
                .or_else(|| value.strip_prefix(WITHDRAW_TYPE))
            {
                Some(method) => Ok(Transaction_Type::Withdraw(
                    method.trim_start_matches(['+', ' ']).trim().to_owned(),
                )),
                None => Err(io::Error::new(
                    io::ErrorKind::Other,
                    "Transaction Type not supported",
                )),
            },
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Deposit {
    pub id: i64,
    pub user_id: i64,
    pub admin_id: i64,
    pub amount: BigDecimal,
    pub currency: String,
    pub transaction_id: String,
    pub deposit_method: String,
    pub status: String,
    pub confirmed_by: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Deposit {
    pub fn status(&self) -> Result<Deposit_Status, Error> {
        Ok(Deposit_Status::from_str(&self.status)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deposit_Status {
    Pending,
    Completed,
    Failed,
}

impl fmt::Display for Deposit_Status {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Deposit_Status::Pending => write!(f, "pending"),
            Deposit_Status::Completed => write!(f, "completed"),
            Deposit_Status::Failed => write!(f, "failed"),
        }
    }
}

impl From<Deposit_Status> for String {
    fn from(value: Deposit_Status) -> Self {
        match value {
            Deposit_Status::Pending => String::from("pending"),
            Deposit_Status::Completed => String::from("completed"),
            Deposit_Status::Failed => String::from("failed"),
        }
    }
}

impl FromStr for Deposit_Status {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Deposit_Status, Self::Err> {
        match value {
            "pending" => Ok(Deposit_Status::Pending),
            "completed" => Ok(Deposit_Status::Completed),
            "failed" => Ok(Deposit_Status::Failed),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "Deposit Status not supported",
            )),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Deposit_Account {
    pub id: i64,
    pub user_id: i64,
    pub bank_name: String,
    pub account_name: String,
    pub account_number: String,
    pub account_type: String,
    pub max_deposit_amount: BigDecimal,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// MARKET DOMAIN
// =============================================================================

/// Singleton row (`id = 1`); `version` is bumped by every write.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Price_Oracle {
    pub id: i32,
    pub pdes_buy_price: BigDecimal,
    pub pdes_sell_price: BigDecimal,
    pub pdes_circulating_supply: BigDecimal,
    pub pdes_supply_left: BigDecimal,
    pub pdes_total_supply: BigDecimal,
    pub pdes_market_cap: BigDecimal,
    pub conversion_rate: BigDecimal,
    pub reward_percentage: BigDecimal,
    pub referral_percentage: BigDecimal,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Price_History {
    pub id: Option<i64>,
    pub crypto_name: String,
    pub action: String,
    pub open_price: BigDecimal,
    pub high_price: BigDecimal,
    pub low_price: BigDecimal,
    pub close_price: BigDecimal,
    pub volume: BigDecimal,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Pdes_Transaction {
    pub id: Option<i64>,
    pub user_id: i64,
    pub action: String,
    pub amount: BigDecimal,
    pub price: BigDecimal,
    pub total: BigDecimal,
    pub reward_earned: BigDecimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trade_Action {
    Buy,
    Sell,
}

impl fmt::Display for Trade_Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Trade_Action::Buy => write!(f, "buy"),
            Trade_Action::Sell => write!(f, "sell"),
        }
    }
}

impl From<Trade_Action> for String {
    fn from(value: Trade_Action) -> Self {
        match value {
            Trade_Action::Buy => String::from("buy"),
            Trade_Action::Sell => String::from("sell"),
        }
    }
}

impl FromStr for Trade_Action {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Trade_Action, Self::Err> {
        match value {
            "buy" => Ok(Trade_Action::Buy),
            "sell" => Ok(Trade_Action::Sell),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "Trade Action not supported",
            )),
        }
    }
}

// =============================================================================
// REWARD DOMAIN
// =============================================================================

/// Effective for `start_date <= t < end_date`; an open `end_date` never
/// expires.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Reward_Setting {
    pub id: Option<i64>,
    pub weekly_percentage: BigDecimal,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
}

impl Reward_Setting {
    pub fn is_effective_at(&self, at: DateTime<Utc>) -> bool {
        self.start_date <= at && self.end_date.map_or(true, |end| at < end)
    }
}

// =============================================================================
// ACCESS CONTROL
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    User,
    Admin,
    SuperAdmin,
    Developer,
    Owner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ConfirmDeposit,
    SettleWithdrawal,
    ManageDepositAccounts,
    ManageOracle,
    ManageRewards,
    ManageUsers,
}

const ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::ConfirmDeposit,
    Capability::SettleWithdrawal,
    Capability::ManageDepositAccounts,
];

const SUPER_ADMIN_CAPABILITIES: &[Capability] = &[
    Capability::ConfirmDeposit,
    Capability::SettleWithdrawal,
    Capability::ManageDepositAccounts,
    Capability::ManageOracle,
    Capability::ManageRewards,
    Capability::ManageUsers,
];

impl Role {
    pub fn capabilities(&self) -> &'static [Capability] {
        match self {
            Role::User => &[],
            Role::Admin => ADMIN_CAPABILITIES,
            Role::SuperAdmin | Role::Developer | Role::Owner => {
                SUPER_ADMIN_CAPABILITIES
            },
        }
    }

    pub fn can(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::User => write!(f, "USER"),
            Role::Admin => write!(f, "ADMIN"),
            Role::SuperAdmin => write!(f, "SUPER_ADMIN"),
            Role::Developer => write!(f, "DEVELOPER"),
            Role::Owner => write!(f, "OWNER"),
        }
    }
}

impl From<Role> for String {
    fn from(value: Role) -> Self {
        value.to_string()
    }
}

impl FromStr for Role {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Role, Self::Err> {
        match value {
            "USER" => Ok(Role::User),
            "ADMIN" => Ok(Role::Admin),
            "SUPER_ADMIN" => Ok(Role::SuperAdmin),
            "DEVELOPER" => Ok(Role::Developer),
            "OWNER" => Ok(Role::Owner),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "Role not supported",
            )),
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Capability::ConfirmDeposit => write!(f, "confirm deposits"),
            Capability::SettleWithdrawal => write!(f, "settle withdrawals"),
            Capability::ManageDepositAccounts => {
                write!(f, "manage deposit accounts")
            },
            Capability::ManageOracle => write!(f, "manage the price oracle"),
            Capability::ManageRewards => write!(f, "manage reward settings"),
            Capability::ManageUsers => write!(f, "manage account standing"),
        }
    }
}

// =============================================================================
// JOB BOOKKEEPING
// =============================================================================

#[derive(Debug, FromRow)]
pub struct Action_History {
    pub action_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub enum Actions {
    RewardAction,
    ReconciliationAction,
}

impl Actions {
    /// Key of the database-wide lock held for a whole job run.
    pub fn lock_key(&self) -> i32 {
        match self {
            Actions::RewardAction => 1,
            Actions::ReconciliationAction => 2,
        }
    }
}

impl fmt::Display for Actions {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Actions::RewardAction => write!(f, "0"),
            Actions::ReconciliationAction => write!(f, "1"),
        }
    }
}

impl From<Actions> for String {
    fn from(value: Actions) -> Self {
        match value {
            Actions::RewardAction => String::from("0"),
            Actions::ReconciliationAction => String::from("1"),
        }
    }
}

impl FromStr for Actions {
    type Err = io::Error;

    fn from_str(value: &str) -> Result<Actions, Self::Err> {
        match value {
            "0" => Ok(Actions::RewardAction),
            "1" => Ok(Actions::ReconciliationAction),
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "Action Type not supported",
            )),
        }
    }
}
