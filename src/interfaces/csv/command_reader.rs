use crate::domain::collection::{LineItem, PaymentMethod};
use crate::domain::money::Money;
use crate::error::{Result, SagaError};
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::io::Read;

#[derive(Debug, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Request,
    Initiate,
    Pay,
    Settle,
    Complete,
    Cancel,
    Sweep,
}

/// One raw script row. Which columns matter depends on `op`.
#[derive(Debug, Deserialize)]
pub struct CommandRecord {
    pub op: Op,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub payment: Option<String>,
    #[serde(default)]
    pub items: Option<String>,
    #[serde(default)]
    pub area: Option<String>,
    #[serde(default)]
    pub date: Option<NaiveDate>,
    #[serde(default)]
    pub method: Option<PaymentMethod>,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub final_payment: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalPayment {
    Cash { amount: Money },
    Digital { payment_id: String },
}

/// A validated script step.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    /// Price and stage a pickup request.
    Request {
        user_id: String,
        items: Vec<LineItem>,
        service_area: String,
        preferred_date: NaiveDate,
    },
    /// Emit `payment.initiated` for the user's staged request.
    Initiate {
        user_id: String,
        payment_id: String,
        amount: Option<Money>,
    },
    /// Record the advance payment as settled and emit `payment.completed`.
    /// A `Wallet` advance is debited from the user's balance first.
    Pay {
        user_id: String,
        payment_id: String,
        amount: Option<Money>,
        method: PaymentMethod,
    },
    /// Record a final payment as settled with the payment service.
    Settle {
        user_id: String,
        payment_id: String,
        amount: Money,
    },
    /// Complete the collection created from `payment_id`.
    Complete {
        payment_id: String,
        payment: FinalPayment,
        feedback: Option<String>,
    },
    /// Cancel the collection created from `payment_id`.
    Cancel { payment_id: String, reason: String },
    Sweep,
}

fn required(value: Option<String>, column: &str, op: Op) -> Result<String> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| SagaError::Validation(format!("{op:?} row is missing `{column}`")))
}

/// Parses `category:qty` pairs separated by `;`, e.g. `A:2;B:1`.
pub fn parse_items(raw: &str) -> Result<Vec<LineItem>> {
    raw.split(';')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (category_id, qty) = pair
                .split_once(':')
                .ok_or_else(|| SagaError::Validation(format!("item `{pair}` is not category:qty")))?;
            let qty = qty
                .trim()
                .parse::<u32>()
                .map_err(|_| SagaError::Validation(format!("item `{pair}` has a bad quantity")))?;
            Ok(LineItem {
                category_id: category_id.trim().to_string(),
                qty,
            })
        })
        .collect()
}

impl TryFrom<CommandRecord> for ScriptCommand {
    type Error = SagaError;

    fn try_from(record: CommandRecord) -> Result<Self> {
        let op = record.op;
        let amount = record.amount.map(Money::new);
        let command = match op {
            Op::Request => ScriptCommand::Request {
                user_id: required(record.user, "user", op)?,
                items: parse_items(&required(record.items, "items", op)?)?,
                service_area: required(record.area, "area", op)?,
                preferred_date: record.date.ok_or_else(|| {
                    SagaError::Validation("Request row is missing `date`".to_string())
                })?,
            },
            Op::Initiate => ScriptCommand::Initiate {
                user_id: required(record.user, "user", op)?,
                payment_id: required(record.payment, "payment", op)?,
                amount,
            },
            Op::Pay => ScriptCommand::Pay {
                user_id: required(record.user, "user", op)?,
                payment_id: required(record.payment, "payment", op)?,
                amount,
                method: match record.method {
                    None | Some(PaymentMethod::Digital) => PaymentMethod::Digital,
                    Some(PaymentMethod::Wallet) => PaymentMethod::Wallet,
                    Some(PaymentMethod::Cash) => {
                        return Err(SagaError::Validation(
                            "an advance cannot be paid in cash".to_string(),
                        ));
                    }
                },
            },
            Op::Settle => ScriptCommand::Settle {
                user_id: required(record.user, "user", op)?,
                payment_id: required(record.final_payment, "final_payment", op)?,
                amount: amount.ok_or_else(|| {
                    SagaError::Validation("Settle row is missing `amount`".to_string())
                })?,
            },
            Op::Complete => {
                let payment = match record.method {
                    Some(PaymentMethod::Cash) => FinalPayment::Cash {
                        amount: amount.ok_or_else(|| {
                            SagaError::Validation("cash completion needs `amount`".to_string())
                        })?,
                    },
                    Some(PaymentMethod::Digital) => FinalPayment::Digital {
                        payment_id: required(record.final_payment, "final_payment", op)?,
                    },
                    Some(PaymentMethod::Wallet) => {
                        return Err(SagaError::Validation(
                            "a final payment is cash or digital".to_string(),
                        ));
                    }
                    None => {
                        return Err(SagaError::Validation(
                            "Complete row is missing `method`".to_string(),
                        ));
                    }
                };
                ScriptCommand::Complete {
                    payment_id: required(record.payment, "payment", op)?,
                    payment,
                    feedback: record.reason.filter(|r| !r.is_empty()),
                }
            }
            Op::Cancel => ScriptCommand::Cancel {
                payment_id: required(record.payment, "payment", op)?,
                reason: record
                    .reason
                    .filter(|r| !r.is_empty())
                    .unwrap_or_else(|| "cancelled by user".to_string()),
            },
            Op::Sweep => ScriptCommand::Sweep,
        };
        Ok(command)
    }
}

/// Reads a saga script with the header
/// `op,user,payment,items,area,date,method,amount,final_payment,reason`.
pub struct CommandReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> CommandReader<R> {
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Lazily parses and validates each row.
    pub fn commands(self) -> impl Iterator<Item = Result<ScriptCommand>> {
        self.reader
            .into_deserialize::<CommandRecord>()
            .map(|result| {
                result
                    .map_err(SagaError::from)
                    .and_then(ScriptCommand::try_from)
            })
    }
}
