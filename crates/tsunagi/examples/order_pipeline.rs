//! Order processing with branching and retry.
//!
//! Demonstrates:
//! - Steps built from a shared context
//! - Retrying the stage before a conditional block until stock is reserved
//! - Failing the run with a typed error and reading it back

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tsunagi::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("order {order_id} exceeds the credit limit of {limit}")]
struct CreditLimitExceeded {
    order_id: String,
    limit: f64,
}

#[derive(Debug, Clone)]
struct Order {
    id: String,
    quantity: u32,
    unit_price: f64,
}

impl Order {
    fn total(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

#[derive(Debug, Clone)]
struct Reservation {
    order: Order,
    reserved: bool,
}

#[derive(Debug)]
struct Receipt {
    order_id: String,
    charged: f64,
}

/// Shared across runs; the warehouse has stock after a few polls.
struct Warehouse {
    polls: Arc<AtomicU32>,
    ready_after: u32,
    credit_limit: f64,
}

struct LoadOrder {
    quantity: u32,
}

impl Step<Order> for LoadOrder {
    fn run(&mut self, _cancel: &CancellationToken) -> StepResult<Order> {
        println!("Loading order...");
        Ok(Order {
            id: "ORD-1001".to_string(),
            quantity: self.quantity,
            unit_price: 24.5,
        })
    }
}

struct ReserveStock {
    polls: Arc<AtomicU32>,
    ready_after: u32,
}

#[async_trait]
impl AsyncInputStep<Order, Reservation> for ReserveStock {
    async fn run(&mut self, order: Order, _cancel: &CancellationToken) -> StepResult<Reservation> {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let reserved = poll >= self.ready_after;
        println!("Reserving stock for {} (poll {}): {}", order.id, poll, reserved);
        Ok(Reservation { order, reserved })
    }
}

struct Charge;

impl InputStep<Reservation, Receipt> for Charge {
    fn run(&mut self, reservation: Reservation, _cancel: &CancellationToken) -> StepResult<Receipt> {
        println!("Charging order {}...", reservation.order.id);
        Ok(Receipt {
            charged: reservation.order.total(),
            order_id: reservation.order.id,
        })
    }
}

fn order_workflow(warehouse: Warehouse, quantity: u32) -> Workflow<Warehouse, Receipt> {
    Workflow::new(warehouse, move |builder| {
        builder
            .start_with(move || LoadOrder { quantity })
            .then_async_ctx(|warehouse: &Warehouse| ReserveStock {
                polls: warehouse.polls.clone(),
                ready_after: warehouse.ready_after,
            })
            .when(|reservation: &Reservation| !reservation.reserved)
            .retry_with(RetryPolicy::exponential(5, Duration::from_millis(50)))
            .else_when(|reservation: &Reservation| reservation.order.total() > 1_000.0)
            .throw(|| CreditLimitExceeded {
                order_id: "ORD-1001".to_string(),
                limit: 1_000.0,
            })
            .otherwise()
            .then(|| Charge)
            .end_when()
            .cast::<Receipt>()
    })
}

fn warehouse(ready_after: u32) -> Warehouse {
    Warehouse {
        polls: Arc::new(AtomicU32::new(0)),
        ready_after,
        credit_limit: 1_000.0,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let cancel = CancellationToken::new();

    let workflow = order_workflow(warehouse(3), 4);
    let result = workflow.run_async(&cancel).await?;
    println!("{}", result.message());
    if let Some(receipt) = result.output() {
        println!("Charged {:.2} for {}", receipt.charged, receipt.order_id);
    }

    let workflow = order_workflow(warehouse(1), 100);
    let result = workflow.run_async(&cancel).await?;
    println!("{}", result.message());
    if let Some(rejected) = result
        .error()
        .and_then(|err| err.downcast_ref::<CreditLimitExceeded>())
    {
        println!(
            "Rejected {} (limit {:.2}, configured {:.2})",
            rejected.order_id,
            rejected.limit,
            workflow.context().credit_limit
        );
    }

    Ok(())
}
