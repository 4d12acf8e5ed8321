//! UI Builder module for creating keyboards and formatting messages

use crate::localization::{t_args_lang, t_lang};
use crate::models::{Category, Order, PaymentMethod, Service};
use crate::notifier::{Button, Markup};

use super::callback_data::{CustomerButton, ProviderAction, ProviderButton};

/// Format a price without trailing zeros, e.g. `80000` or `12.50`
pub fn format_price(price: f64) -> String {
    if price.fract() == 0.0 {
        format!("{price:.0}")
    } else {
        format!("{price:.2}")
    }
}

/// One button per category, labelled with its icon and name
pub fn category_menu(categories: &[Category]) -> Markup {
    Markup::Inline(
        categories
            .iter()
            .map(|c| {
                let label = match c.icon.as_deref().map(str::trim) {
                    Some(icon) if !icon.is_empty() => format!("{icon} {}", c.name),
                    _ => c.name.clone(),
                };
                vec![Button::new(label, CustomerButton::Category(c.id).token())]
            })
            .collect(),
    )
}

/// One button per service; the label carries the price when one is set
pub fn service_menu(services: &[Service], language_code: Option<&str>) -> Markup {
    Markup::Inline(
        services
            .iter()
            .map(|s| {
                let label = match s.price {
                    Some(price) => t_args_lang(
                        "service-price",
                        &[("name", &s.name), ("price", &format_price(price))],
                        language_code,
                    ),
                    None => s.name.clone(),
                };
                vec![Button::new(label, CustomerButton::Service(s.id).token())]
            })
            .collect(),
    )
}

/// Fixed 2x2 grid of payment options
pub fn payment_menu() -> Markup {
    let button = |method: PaymentMethod| {
        Button::new(method.label(), CustomerButton::Payment(method).token())
    };
    Markup::Inline(vec![
        vec![button(PaymentMethod::Click), button(PaymentMethod::Payme)],
        vec![button(PaymentMethod::Cash), button(PaymentMethod::Qr)],
    ])
}

pub fn phone_request(language_code: Option<&str>) -> Markup {
    Markup::RequestContact(t_lang("share-phone-button", language_code))
}

pub fn location_request(language_code: Option<&str>) -> Markup {
    Markup::RequestLocation(t_lang("share-location-button", language_code))
}

/// Provider order list, one `#id - service` button per order
pub fn provider_orders_menu(orders: &[(Order, Option<String>)]) -> Markup {
    Markup::Inline(
        orders
            .iter()
            .map(|(order, service_name)| {
                let label = match service_name {
                    Some(name) => format!("#{} - {name}", order.id),
                    None => format!("#{}", order.id),
                };
                vec![Button::new(label, ProviderButton::ShowOrder(order.id).token())]
            })
            .collect(),
    )
}

/// Order details for the provider, with the two status buttons
pub fn provider_order_card(
    order: &Order,
    service_name: Option<&str>,
    language_code: Option<&str>,
) -> (String, Markup) {
    let missing = t_lang("value-missing", language_code);
    let address = match (order.location(), order.address_text.as_deref()) {
        (Some(point), _) => format!("{:.5}, {:.5}", point.latitude, point.longitude),
        (None, Some(text)) => text.to_string(),
        (None, None) => missing.clone(),
    };
    let order_id = order.id.to_string();

    let text = t_args_lang(
        "master-order-card",
        &[
            ("order_id", &order_id),
            ("service", service_name.unwrap_or(&missing)),
            ("phone", order.phone.as_deref().unwrap_or(&missing)),
            ("address", &address),
            ("comment", order.comment.as_deref().unwrap_or(&missing)),
            (
                "payment",
                order.payment_method.map(|m| m.label()).unwrap_or(&missing),
            ),
        ],
        language_code,
    );

    let keyboard = Markup::Inline(vec![
        vec![Button::new(
            t_lang("master-button-start", language_code),
            ProviderButton::Status(order.id, ProviderAction::Start).token(),
        )],
        vec![Button::new(
            t_lang("master-button-done", language_code),
            ProviderButton::Status(order.id, ProviderAction::Finish).token(),
        )],
    ]);

    (text, keyboard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ConversationKey;
    use chrono::Utc;

    fn service(id: i64, name: &str, price: Option<f64>) -> Service {
        Service {
            id,
            name: name.to_string(),
            price,
            description: None,
            category_id: 1,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_price_formatting() {
        assert_eq!(format_price(80000.0), "80000");
        assert_eq!(format_price(12.5), "12.50");
    }

    #[test]
    fn test_service_menu_labels() {
        let menu = service_menu(
            &[service(5, "Kran", Some(80000.0)), service(6, "Diagnostika", None)],
            Some("uz"),
        );
        let Markup::Inline(rows) = menu else {
            panic!("expected inline keyboard");
        };
        assert_eq!(rows[0][0].label, "Kran - 80000 so'm");
        assert_eq!(rows[0][0].token, "srv_5");
        assert_eq!(rows[1][0].label, "Diagnostika");
    }

    #[test]
    fn test_category_menu_skips_blank_icon() {
        let categories = vec![
            Category {
                id: 1,
                name: "Santexnika".to_string(),
                icon: Some("🔧".to_string()),
                created_at: Utc::now(),
            },
            Category {
                id: 2,
                name: "Elektr".to_string(),
                icon: Some(" ".to_string()),
                created_at: Utc::now(),
            },
        ];
        let Markup::Inline(rows) = category_menu(&categories) else {
            panic!("expected inline keyboard");
        };
        assert_eq!(rows[0][0].label, "🔧 Santexnika");
        assert_eq!(rows[1][0].label, "Elektr");
        assert_eq!(rows[1][0].token, "cat_2");
    }

    #[test]
    fn test_payment_menu_has_four_options() {
        let Markup::Inline(rows) = payment_menu() else {
            panic!("expected inline keyboard");
        };
        let tokens: Vec<&str> = rows.iter().flatten().map(|b| b.token.as_str()).collect();
        assert_eq!(tokens, vec!["pay_CLICK", "pay_PAYME", "pay_CASH", "pay_QR"]);
    }

    #[test]
    fn test_provider_card_prefers_coordinates() {
        let mut order = crate::models::Order::new(9, ConversationKey::new(1, 1), Utc::now());
        order.phone = Some("+998901234567".to_string());
        order.location_lat = Some(41.3);
        order.location_lng = Some(69.2);
        order.payment_method = Some(PaymentMethod::Cash);

        let (text, markup) = provider_order_card(&order, Some("Kran"), Some("uz"));
        assert!(text.contains("Buyurtma #9"));
        assert!(text.contains("41.30000, 69.20000"));
        assert!(text.contains("Naqd"));

        let Markup::Inline(rows) = markup else {
            panic!("expected inline keyboard");
        };
        assert_eq!(rows[0][0].token, "st_9_start");
        assert_eq!(rows[1][0].token, "st_9_done");
    }
}
