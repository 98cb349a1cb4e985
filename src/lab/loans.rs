//! Quantity-ledger allocator.
//!
//! Stock is committed per line. A line's decrement and its ledger row are one
//! store step, but lines are independent of each other: if some commit and
//! others fail, the committed ones stay and the caller gets a
//! [`LabError::PartialFailure`] listing both sides.

use futures::future::join_all;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::Subject;
use crate::store::StoreError;

use super::error::{Conflict, Entity, LabError, LineFailure, PartialFailure, Stage, ValidationError};
use super::guard::{self, Transition};
use super::oracle::Demand;
use super::{Lab, ops, require_student};

fn validate_request(purpose: &str, lines: &[LoanLine]) -> Result<(), ValidationError> {
    let len = purpose.trim().chars().count();
    if len < MIN_PURPOSE_LEN {
        return Err(ValidationError::PurposeTooShort { min: MIN_PURPOSE_LEN });
    }
    if len > MAX_PURPOSE_LEN {
        return Err(ValidationError::PurposeTooLong { max: MAX_PURPOSE_LEN });
    }
    if lines.is_empty() {
        return Err(ValidationError::NoLines);
    }
    if lines.len() > MAX_LINES_PER_REQUEST {
        return Err(ValidationError::TooManyLines { max: MAX_LINES_PER_REQUEST });
    }
    for line in lines {
        if line.quantity == 0 {
            return Err(ValidationError::ZeroQuantity { item_id: line.item_id });
        }
        if line.quantity > MAX_LINE_QUANTITY {
            return Err(ValidationError::QuantityTooLarge {
                item_id: line.item_id,
                max: MAX_LINE_QUANTITY,
            });
        }
    }
    Ok(())
}

impl Lab {
    /// Record a pending loan request. Stock is not checked until approval.
    pub async fn create_loan_request(
        &self,
        purpose: &str,
        lines: Vec<LoanLine>,
        actor: &Actor,
    ) -> Result<Ulid, LabError> {
        self.observed(ops::CREATE_LOAN, async {
            require_student(actor, ops::CREATE_LOAN)?;
            validate_request(purpose, &lines)?;
            for line in &lines {
                if self.store.item(line.item_id).await?.is_none() {
                    return Err(ValidationError::UnknownItem(line.item_id).into());
                }
            }

            let request = LoanRequest {
                id: Ulid::new(),
                requester: actor.id,
                purpose: purpose.trim().to_string(),
                status: LoanStatus::Pending,
                decided_by: None,
                decided_at: None,
                created_at: now_ms(),
                lines: Vec::new(),
            };
            let id = request.id;
            self.store.insert_loan_request(request).await?;

            if let Err(cause) = self.store.insert_loan_lines(id, lines.clone()).await {
                let failed = lines
                    .into_iter()
                    .map(|line| LineFailure { line, error: cause.clone() })
                    .collect();
                return Err(LabError::partial(PartialFailure {
                    request_id: id,
                    stage: Stage::Lines,
                    committed: Vec::new(),
                    failed,
                    cause,
                }));
            }

            info!(loan_request_id = %id, requester = %actor.id, "loan request created");
            self.refresh(Subject::LoanRequest(id), ops::CREATE_LOAN);
            Ok(id)
        })
        .await
    }

    /// Check every line against current stock, then take the stock line by
    /// line and mark the request approved.
    pub async fn approve_loan_request(&self, id: Ulid, actor: &Actor) -> Result<LoanRequest, LabError> {
        self.observed(ops::APPROVE_LOAN, async {
            let transition = &guard::loan::APPROVE;
            let request = self.load_for_transition(transition, id, actor).await?;

            let demand = self.demand(&request.lines).await?;
            if let Some(short) = demand.iter().find(|d| !d.is_covered()) {
                return Err(short.shortfall().into());
            }

            self.move_stock(&request, -1, actor, &demand).await?;
            self.finish_loan(transition, request, actor).await
        })
        .await
    }

    pub async fn reject_loan_request(&self, id: Ulid, actor: &Actor) -> Result<LoanRequest, LabError> {
        self.observed(ops::REJECT_LOAN, async {
            let transition = &guard::loan::REJECT;
            let request = self.load_for_transition(transition, id, actor).await?;
            let decision = Decision {
                to: transition.to,
                decided_by: transition.decider(actor),
                decided_at: now_ms(),
            };
            let updated = self
                .store
                .transition_loan(id, request.status, decision)
                .await
                .map_err(|e| transition.map_store_error(id, e))?;
            info!(loan_request_id = %id, actor = %actor.id, "loan request rejected");
            self.refresh(Subject::LoanRequest(id), transition.op);
            Ok(updated)
        })
        .await
    }

    /// Give every line's stock back and mark the request returned.
    pub async fn return_loan_request(&self, id: Ulid, actor: &Actor) -> Result<LoanRequest, LabError> {
        self.observed(ops::RETURN_LOAN, async {
            let transition = &guard::loan::RETURN;
            let request = self.load_for_transition(transition, id, actor).await?;
            self.move_stock(&request, 1, actor, &[]).await?;
            self.finish_loan(transition, request, actor).await
        })
        .await
    }

    async fn load_for_transition(
        &self,
        transition: &Transition<LoanStatus>,
        id: Ulid,
        actor: &Actor,
    ) -> Result<LoanRequest, LabError> {
        transition.check_role(actor)?;
        let request = self
            .store
            .loan_request(id)
            .await?
            .ok_or_else(|| LabError::not_found(Entity::LoanRequest, id))?;
        transition.check_source(id, request.status)?;
        Ok(request)
    }

    /// Apply one stock move per line, concurrently. `sign` is -1 to take
    /// stock and +1 to give it back.
    async fn move_stock(
        &self,
        request: &LoanRequest,
        sign: i64,
        actor: &Actor,
        demand: &[Demand],
    ) -> Result<(), LabError> {
        let at = now_ms();
        let results = join_all(request.lines.iter().map(|line| {
            self.store.apply_stock_move(StockMove {
                id: Ulid::new(),
                item_id: line.item_id,
                request_id: Some(request.id),
                delta: sign * i64::from(line.quantity),
                actor: actor.id,
                at,
            })
        }))
        .await;

        let mut committed = Vec::new();
        let mut failed = Vec::new();
        for (line, result) in request.lines.iter().zip(results) {
            match result {
                Ok(stock) => {
                    info!(loan_request_id = %request.id, item_id = %line.item_id, delta = sign * i64::from(line.quantity), stock, "stock moved");
                    committed.push(*line);
                }
                Err(error) => failed.push(LineFailure { line: *line, error }),
            }
        }

        let Some(first) = failed.first() else {
            return Ok(());
        };
        let cause = first.error.clone();
        if !committed.is_empty() {
            return Err(LabError::partial(PartialFailure {
                request_id: request.id,
                stage: Stage::Stock,
                committed,
                failed,
                cause,
            }));
        }

        // Nothing changed: a clean failure.
        Err(match cause {
            StoreError::InsufficientStock { item_id, available, requested } => {
                let item_name = demand
                    .iter()
                    .find(|d| d.item_id == item_id)
                    .map(|d| d.name.clone())
                    .unwrap_or_else(|| item_id.to_string());
                Conflict::InsufficientStock { item_id, item_name, available, requested }.into()
            }
            StoreError::NotFound(item_id) => LabError::not_found(Entity::Item, item_id),
            other => LabError::Store(other),
        })
    }

    /// Status write after every line committed. Losing it leaves the stock
    /// moved, so any failure here is partial.
    async fn finish_loan(
        &self,
        transition: &Transition<LoanStatus>,
        request: LoanRequest,
        actor: &Actor,
    ) -> Result<LoanRequest, LabError> {
        let id = request.id;
        let decision = Decision {
            to: transition.to,
            decided_by: transition.decider(actor),
            decided_at: now_ms(),
        };
        let updated = match self.store.transition_loan(id, request.status, decision).await {
            Ok(updated) => updated,
            Err(cause) => {
                if let StoreError::StatusMismatch { current, .. } = &cause {
                    warn!(
                        loan_request_id = %id,
                        current,
                        lines = request.lines.len(),
                        "loan request decided concurrently; its stock moves need a manual restock"
                    );
                }
                return Err(LabError::partial(PartialFailure {
                    request_id: id,
                    stage: Stage::Status,
                    committed: request.lines,
                    failed: Vec::new(),
                    cause,
                }));
            }
        };

        info!(loan_request_id = %id, actor = %actor.id, status = %updated.status, "loan request decided");
        for line in &updated.lines {
            self.refresh(Subject::Item(line.item_id), transition.op);
        }
        self.refresh(Subject::LoanRequest(id), transition.op);
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: u32) -> LoanLine {
        LoanLine { item_id: Ulid::nil(), quantity }
    }

    #[test]
    fn purpose_length_enforced() {
        assert_eq!(
            validate_request("  a ", &[line(1)]),
            Err(ValidationError::PurposeTooShort { min: MIN_PURPOSE_LEN })
        );
        assert!(validate_request("Circuits lab", &[line(1)]).is_ok());
        let long = "x".repeat(MAX_PURPOSE_LEN + 1);
        assert!(matches!(
            validate_request(&long, &[line(1)]),
            Err(ValidationError::PurposeTooLong { .. })
        ));
    }

    #[test]
    fn lines_checked() {
        assert_eq!(validate_request("Circuits lab", &[]), Err(ValidationError::NoLines));
        assert!(matches!(
            validate_request("Circuits lab", &[line(2), line(0)]),
            Err(ValidationError::ZeroQuantity { .. })
        ));
        assert!(matches!(
            validate_request("Circuits lab", &[line(MAX_LINE_QUANTITY + 1)]),
            Err(ValidationError::QuantityTooLarge { .. })
        ));
        let many = vec![line(1); MAX_LINES_PER_REQUEST + 1];
        assert!(matches!(
            validate_request("Circuits lab", &many),
            Err(ValidationError::TooManyLines { .. })
        ));
    }
}
