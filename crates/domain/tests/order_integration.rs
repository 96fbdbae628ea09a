//! Integration tests for the order and account aggregates.
//!
//! These tests walk the order lifecycle driven by the create-order saga and
//! check the events each transition announces.

use common::{ErrorClass, OrderId, ProductId, UserId};
use domain::{
    Account, AccountError, AccountEvent, DomainError, DomainEvent, Money, Order, OrderError,
    OrderEvent, OrderItem, OrderStatus,
};

fn line(quantity: u32, price: i64) -> OrderItem {
    OrderItem::new(ProductId::new(), quantity, Money::new(price))
}

mod order_lifecycle {
    use super::*;

    #[test]
    fn test_paid_order_lifecycle() {
        let order_id = OrderId::new();
        let user_id = UserId::new();

        let (mut order, created) =
            Order::create(order_id, user_id, vec![line(2, 25), line(1, 50)]).unwrap();
        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.total_price(), Money::new(100));
        assert_eq!(created.event_type(), "order_created");
        assert_eq!(created.routing_key(), "order.created");
        let payload = created.payload().unwrap();
        assert_eq!(payload["user_id"], user_id.to_string());

        let paid = order.mark_as_paid().unwrap().unwrap();
        assert_eq!(paid, OrderEvent::Paid(domain::order::OrderPaid { order_id }));
        assert!(order.status().is_terminal());

        // Reported twice by a resumed saga.
        assert!(order.mark_as_paid().unwrap().is_none());
    }

    #[test]
    fn test_cancelled_order_keeps_reason() {
        let (mut order, _) =
            Order::create(OrderId::new(), UserId::new(), vec![line(1, 10)]).unwrap();

        let event = order.cancel("Payment failed").unwrap().unwrap();

        assert_eq!(order.status(), OrderStatus::Cancelled);
        assert_eq!(order.cancel_reason(), Some("Payment failed"));
        assert_eq!(event.payload().unwrap()["reason"], "Payment failed");
        assert!(order.cancel("again").unwrap().is_none());
        assert_eq!(order.cancel_reason(), Some("Payment failed"));
    }

    #[test]
    fn test_paid_order_cannot_be_cancelled() {
        let (mut order, _) =
            Order::create(OrderId::new(), UserId::new(), vec![line(1, 10)]).unwrap();
        order.mark_as_paid().unwrap();

        let err = order.cancel("too late").unwrap_err();

        assert!(matches!(err, OrderError::InvalidStatusTransition { .. }));
        assert_eq!(DomainError::from(err).class(), ErrorClass::Conflict);
    }
}

mod order_validation {
    use super::*;

    #[test]
    fn test_empty_order_is_rejected() {
        let err = Order::create(OrderId::new(), UserId::new(), vec![]).unwrap_err();
        assert!(matches!(err, OrderError::NoItems));
        assert_eq!(err.class(), ErrorClass::Validation);
    }

    #[test]
    fn test_zero_quantity_is_rejected() {
        let err = Order::create(OrderId::new(), UserId::new(), vec![line(0, 10)]).unwrap_err();
        assert!(matches!(err, OrderError::InvalidQuantity { quantity: 0, .. }));
    }

    #[test]
    fn test_overflowing_total_is_rejected() {
        let err = Order::create(OrderId::new(), UserId::new(), vec![line(2, i64::MAX)])
            .unwrap_err();
        assert!(matches!(err, OrderError::TotalOverflow));
    }
}

mod account_balance {
    use super::*;

    #[test]
    fn test_charge_then_refund_restores_balance() {
        let (mut account, opened) = Account::open(UserId::new(), Money::new(150)).unwrap();
        assert_eq!(opened.event_type(), "account_created");

        let charged = account.charge(Money::new(100)).unwrap();
        assert_eq!(account.balance, Money::new(50));
        assert_eq!(charged.event_type(), "account_balance_updated");
        assert_eq!(charged.payload().unwrap()["balance"], 50);

        account.refund(Money::new(100)).unwrap();
        assert_eq!(account.balance, Money::new(150));
    }

    #[test]
    fn test_overdraft_is_a_conflict() {
        let (mut account, _) = Account::open(UserId::new(), Money::new(50)).unwrap();

        let err = account.charge(Money::new(100)).unwrap_err();

        assert!(matches!(
            err,
            AccountError::InsufficientFunds { balance, requested }
                if balance == Money::new(50) && requested == Money::new(100)
        ));
        assert_eq!(err.class(), ErrorClass::Conflict);
        assert_eq!(account.balance, Money::new(50));
    }

    #[test]
    fn test_unchanged_balance_emits_nothing() {
        let (mut account, _) = Account::open(UserId::new(), Money::new(10)).unwrap();

        assert!(account.update_balance(Money::new(10)).unwrap().is_none());
        let event = account.update_balance(Money::new(20)).unwrap().unwrap();
        assert!(
            matches!(event, AccountEvent::BalanceUpdated(ref e) if e.balance == Money::new(20))
        );
        assert!(account.update_balance(Money::new(-1)).is_err());
    }
}
