use anyhow::Result;
use std::sync::Arc;
use usta_bot::bot::{LifecycleController, ProviderAction, ProviderDesk, ProviderEvent};
use usta_bot::dialogue::Step;
use usta_bot::locks::ConversationLocks;
use usta_bot::models::{ConversationKey, NewCategory, NewService, Order, OrderStatus};
use usta_bot::notifier::{Channel, Markup};
use usta_bot::store::{MemoryStore, OrderStore};
use usta_bot::OrderError;

const PROVIDER_CHAT: i64 = 777;

struct Fixture {
    store: Arc<MemoryStore>,
    lifecycle: Arc<LifecycleController>,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let lifecycle = Arc::new(LifecycleController::new(
        store.clone(),
        Arc::new(ConversationLocks::new()),
        "uz",
    ));
    Fixture { store, lifecycle }
}

/// Order of conversation (user, user) placed up to the given status
async fn order_with_status(store: &MemoryStore, user: i64, status: OrderStatus) -> Result<Order> {
    let mut order = store.create_order(ConversationKey::new(user, user)).await?;
    order.status = status;
    order.step = Step::Done;
    Ok(store.save_order(&order).await?)
}

#[tokio::test]
async fn test_provider_start_then_finish() -> Result<()> {
    let f = fixture();
    let order = order_with_status(&f.store, 1, OrderStatus::Pending).await?;

    let change = f
        .lifecycle
        .provider_transition(order.id, ProviderAction::Start, PROVIDER_CHAT)
        .await?;
    assert_eq!(change.previous, OrderStatus::Pending);
    assert_eq!(change.order.status, OrderStatus::InProgress);
    let targets: Vec<Channel> = change.notifications.iter().map(|n| n.target).collect();
    assert_eq!(
        targets,
        vec![Channel::Provider(PROVIDER_CHAT), Channel::Customer(1), Channel::Admin]
    );

    let change = f
        .lifecycle
        .provider_transition(order.id, ProviderAction::Finish, PROVIDER_CHAT)
        .await?;
    assert_eq!(change.order.status, OrderStatus::Done);
    assert_eq!(change.notifications.len(), 3);
    assert!(f.store.find_active_order(order.key()).await?.is_none());
    Ok(())
}

#[tokio::test]
async fn test_provider_finish_rejected_before_work_started() -> Result<()> {
    let f = fixture();
    for (user, status) in [(1, OrderStatus::New), (2, OrderStatus::Pending)] {
        let order = order_with_status(&f.store, user, status).await?;

        let result = f
            .lifecycle
            .provider_transition(order.id, ProviderAction::Finish, PROVIDER_CHAT)
            .await;

        assert!(matches!(
            result,
            Err(OrderError::InvalidTransition { from, to: OrderStatus::Done }) if from == status
        ));
        let stored = f.store.get_order(order.id).await?.expect("order");
        assert_eq!(stored, order);
    }
    Ok(())
}

#[tokio::test]
async fn test_provider_transition_on_missing_order() {
    let f = fixture();
    let result = f
        .lifecycle
        .provider_transition(404, ProviderAction::Start, PROVIDER_CHAT)
        .await;
    assert!(matches!(result, Err(OrderError::NotFound(_))));
}

#[tokio::test]
async fn test_admin_close_is_unconditional_and_silent_to_customer() -> Result<()> {
    let f = fixture();
    let order = order_with_status(&f.store, 1, OrderStatus::Pending).await?;

    let change = f.lifecycle.admin_set_status(order.id, OrderStatus::Closed).await?;

    assert_eq!(change.order.status, OrderStatus::Closed);
    assert_eq!(change.previous, OrderStatus::Pending);
    assert!(change.notifications.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_admin_customer_visible_statuses_notify() -> Result<()> {
    let f = fixture();
    let order = order_with_status(&f.store, 1, OrderStatus::Pending).await?;

    let change = f
        .lifecycle
        .admin_set_status(order.id, OrderStatus::PaymentPending)
        .await?;
    assert_eq!(change.notifications.len(), 1);
    assert_eq!(change.notifications[0].target, Channel::Customer(1));
    assert!(change.notifications[0].text.contains(&format!("#{}", order.id)));

    let change = f.lifecycle.admin_set_status(order.id, OrderStatus::Done).await?;
    let targets: Vec<Channel> = change.notifications.iter().map(|n| n.target).collect();
    assert_eq!(targets, vec![Channel::Customer(1), Channel::Admin]);

    // Setting the same status again changes nothing visible
    let change = f.lifecycle.admin_set_status(order.id, OrderStatus::Done).await?;
    assert!(change.notifications.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_admin_cannot_create_second_active_order() -> Result<()> {
    let f = fixture();
    let old = order_with_status(&f.store, 1, OrderStatus::Closed).await?;
    let current = f.store.create_order(old.key()).await?;

    let result = f.lifecycle.admin_set_status(old.id, OrderStatus::Pending).await;

    assert!(matches!(result, Err(OrderError::Conflict(_))));
    assert_eq!(f.store.get_order(old.id).await?.expect("order").status, OrderStatus::Closed);
    assert_eq!(
        f.store.find_active_order(old.key()).await?.map(|o| o.id),
        Some(current.id)
    );
    Ok(())
}

#[tokio::test]
async fn test_admin_message_is_recorded_and_relayed() -> Result<()> {
    let f = fixture();
    let order = order_with_status(&f.store, 3, OrderStatus::InProgress).await?;

    let (message, notifications) = f
        .lifecycle
        .admin_post_message(order.id, "  Usta 15 daqiqada yetib boradi ")
        .await?;

    assert!(message.from_admin);
    assert_eq!(message.text, "Usta 15 daqiqada yetib boradi");
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].target, Channel::Customer(3));
    assert!(notifications[0].text.contains("Usta 15 daqiqada yetib boradi"));
    assert_eq!(f.store.list_messages(order.id).await?.len(), 1);

    let result = f.lifecycle.admin_post_message(order.id, "   ").await;
    assert!(matches!(result, Err(OrderError::Invalid(_))));
    let result = f.lifecycle.admin_post_message(999, "salom").await;
    assert!(matches!(result, Err(OrderError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_provider_bot_flow() -> Result<()> {
    let f = fixture();
    let category = f
        .store
        .create_category(&NewCategory {
            name: "Santexnika".to_string(),
            icon: None,
        })
        .await?;
    let service = f
        .store
        .create_service(&NewService {
            name: "Kran".to_string(),
            price: Some(80000.0),
            description: None,
            category_id: category.id,
        })
        .await?;
    let mut order = order_with_status(&f.store, 1, OrderStatus::Pending).await?;
    order.service_id = Some(service.id);
    order.phone = Some("+998901234567".to_string());
    let order = f.store.save_order(&order).await?;
    order_with_status(&f.store, 2, OrderStatus::New).await?;

    let desk = ProviderDesk::new(f.store.clone(), f.lifecycle.clone(), vec![], "uz");

    let sent = desk
        .handle(PROVIDER_CHAT, ProviderEvent::Command("/orders".to_string()))
        .await?;
    assert_eq!(sent.len(), 1);
    let Some(Markup::Inline(rows)) = &sent[0].markup else {
        panic!("expected order list");
    };
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0].label, format!("#{} - Kran", order.id));

    let sent = desk
        .handle(PROVIDER_CHAT, ProviderEvent::Button(format!("ord_{}", order.id)))
        .await?;
    assert!(sent[0].text.contains("+998901234567"));

    let sent = desk
        .handle(PROVIDER_CHAT, ProviderEvent::Button(format!("st_{}_done", order.id)))
        .await?;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].target, Channel::Provider(PROVIDER_CHAT));
    assert_eq!(
        f.store.get_order(order.id).await?.expect("order").status,
        OrderStatus::Pending
    );

    let sent = desk
        .handle(PROVIDER_CHAT, ProviderEvent::Button(format!("st_{}_start", order.id)))
        .await?;
    assert_eq!(sent.len(), 3);
    assert_eq!(
        f.store.get_order(order.id).await?.expect("order").status,
        OrderStatus::InProgress
    );
    Ok(())
}

#[tokio::test]
async fn test_provider_allowlist() -> Result<()> {
    let f = fixture();
    let desk = ProviderDesk::new(f.store.clone(), f.lifecycle.clone(), vec![PROVIDER_CHAT], "uz");

    assert!(desk.is_authorized(PROVIDER_CHAT));
    assert!(!desk.is_authorized(1));
    let sent = desk
        .handle(1, ProviderEvent::Command("/orders".to_string()))
        .await?;
    assert!(sent.is_empty());

    let sent = desk
        .handle(PROVIDER_CHAT, ProviderEvent::Command("/orders".to_string()))
        .await?;
    assert_eq!(sent[0].text, "Hozircha faol buyurtmalar yo'q.");
    Ok(())
}
