//! End-to-end flows through the engine: purchase-to-stock,
//! order-to-cash, reversals, credit control and rollback.

use chrono::Utc;

use tradeflow_core::{
    ClientId, DocumentId, DomainError, EntityKind, ProductId, StockKey, SupplierId, UserId,
    WarehouseId,
};
use tradeflow_history::EntityRef;
use tradeflow_invoicing::{NewCreditLine, NewInvoiceItem};
use tradeflow_inventory::MovementType;
use tradeflow_parties::client::Client;
use tradeflow_parties::credit::CreditOverride;
use tradeflow_purchasing::{
    AdditionalCost, CostType, ImportMetadata, NewGrnLine, NewPoItem, PurchaseInvoiceItem,
    PurchaseOrderStatus,
};
use tradeflow_sales::{
    DeliveryNoteStatus, NewDnLine, NewSoItem, NewStandaloneDnLine, PaymentType, SalesOrderStatus,
};

use crate::engine::Engine;

fn engine() -> Engine {
    Engine::default()
}

fn actor() -> UserId {
    UserId::new()
}

fn register_client(engine: &Engine, limit: f64) -> ClientId {
    let client = Client::new(ClientId::new(), "Harbor Distribution", limit, 30).unwrap();
    let id = client.id();
    engine.register_client(actor(), client).unwrap();
    id
}

/// PO + full receipt, returning (product, warehouse, po_id, grn_id).
fn seed_stock(
    engine: &Engine,
    qty: i64,
    unit_cost: f64,
) -> (ProductId, WarehouseId, DocumentId, DocumentId) {
    let product_id = ProductId::new();
    let warehouse_id = WarehouseId::new();
    let po_id = engine
        .create_purchase_order(
            actor(),
            SupplierId::new(),
            Utc::now(),
            vec![NewPoItem {
                product_id,
                variant_id: None,
                ordered_qty: qty,
                unit_cost,
            }],
            ImportMetadata::default(),
        )
        .unwrap();
    let po = engine.purchase_order(po_id).unwrap();
    let grn_id = engine
        .receive_goods(
            actor(),
            po_id,
            warehouse_id,
            Utc::now(),
            vec![NewGrnLine {
                po_item_id: po.items()[0].id,
                received_qty: qty,
                batch_no: None,
                bin_location: None,
            }],
        )
        .unwrap();
    (product_id, warehouse_id, po_id, grn_id)
}

#[test]
fn partial_receipt_then_cancellation_reconciles_stock_and_order() {
    let engine = engine();
    let product_id = ProductId::new();
    let warehouse_id = WarehouseId::new();
    let po_id = engine
        .create_purchase_order(
            actor(),
            SupplierId::new(),
            Utc::now(),
            vec![NewPoItem {
                product_id,
                variant_id: None,
                ordered_qty: 50,
                unit_cost: 10.0,
            }],
            ImportMetadata::default(),
        )
        .unwrap();
    let item_id = engine.purchase_order(po_id).unwrap().items()[0].id;
    let line = |qty| {
        vec![NewGrnLine {
            po_item_id: item_id,
            received_qty: qty,
            batch_no: None,
            bin_location: None,
        }]
    };

    engine
        .receive_goods(actor(), po_id, warehouse_id, Utc::now(), line(30))
        .unwrap();
    let stock_key = StockKey::new(product_id, warehouse_id);
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 30);
    assert_eq!(
        engine.purchase_order(po_id).unwrap().status(),
        PurchaseOrderStatus::Pending
    );

    let grn2 = engine
        .receive_goods(actor(), po_id, warehouse_id, Utc::now(), line(20))
        .unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 50);
    assert_eq!(
        engine.purchase_order(po_id).unwrap().status(),
        PurchaseOrderStatus::Received
    );

    // a fully received order takes no further receipts
    let err = engine
        .receive_goods(actor(), po_id, warehouse_id, Utc::now(), line(1))
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition(_)));

    // cancelling the second receipt walks both stock and the order back
    engine
        .cancel_goods_receipt(actor(), grn2, "mislabelled pallet")
        .unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 30);
    let po = engine.purchase_order(po_id).unwrap();
    assert_eq!(po.items()[0].received_qty, 30);
    assert_eq!(po.status(), PurchaseOrderStatus::Pending);
}

#[test]
fn dispatch_invoice_void_round_trip() {
    let engine = engine();
    let client_id = register_client(&engine, 100_000.0);
    let (product_id, warehouse_id, _, _) = seed_stock(&engine, 100, 50.0);
    let stock_key = StockKey::new(product_id, warehouse_id);

    let so_id = engine
        .create_sales_order(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Credit,
            vec![NewSoItem {
                product_id,
                variant_id: None,
                ordered_qty: 10,
                unit_price: 1_500.0,
                discount: 0.0,
            }],
        )
        .unwrap();
    engine
        .confirm_sales_order(actor(), so_id, &CreditOverride::none())
        .unwrap();

    let so_item_id = engine.sales_order(so_id).unwrap().items()[0].id;
    let dn_id = engine
        .create_delivery_note(
            actor(),
            so_id,
            vec![NewDnLine {
                so_item_id,
                qty: 10,
                batch_no: None,
            }],
        )
        .unwrap();
    engine.dispatch_delivery_note(actor(), dn_id).unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 90);
    assert_eq!(
        engine.sales_order(so_id).unwrap().status(),
        SalesOrderStatus::Delivered
    );

    let invoice_id = engine
        .invoice_delivery_note(actor(), dn_id, 0.0, &CreditOverride::none())
        .unwrap();
    // 10 * 1500 on CREDIT: exposure goes up with the invoice
    assert!((engine.client(client_id).unwrap().balance() - 15_000.0).abs() < 1e-9);
    assert_eq!(
        engine.sales_order(so_id).unwrap().status(),
        SalesOrderStatus::Invoiced
    );

    engine
        .void_sales_invoice(actor(), invoice_id, "wrong prices keyed")
        .unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 100);
    assert_eq!(engine.client(client_id).unwrap().balance(), 0.0);
    // order accrual reversed: back to the delivered-but-uninvoiced state
    assert_eq!(
        engine.sales_order(so_id).unwrap().status(),
        SalesOrderStatus::Delivered
    );
}

#[test]
fn credit_gate_blocks_and_override_is_audited() {
    let engine = engine();
    let client_id = register_client(&engine, 100_000.0);
    let (product_id, warehouse_id, _, _) = seed_stock(&engine, 1_000, 10.0);

    // push the balance to 80k
    engine
        .create_direct_invoice(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Credit,
            vec![NewInvoiceItem {
                product_id,
                variant_id: None,
                qty: 80,
                unit_price: 1_000.0,
                discount: 0.0,
                batch_no: None,
            }],
            0.0,
            &CreditOverride::none(),
        )
        .unwrap();
    assert!((engine.client(client_id).unwrap().balance() - 80_000.0).abs() < 1e-9);

    // another 25k would be 105% utilization
    let over = vec![NewInvoiceItem {
        product_id,
        variant_id: None,
        qty: 25,
        unit_price: 1_000.0,
        discount: 0.0,
        batch_no: None,
    }];
    let err = engine
        .create_direct_invoice(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Credit,
            over.clone(),
            0.0,
            &CreditOverride::none(),
        )
        .unwrap_err();
    assert!(matches!(err, DomainError::CreditLimitExceeded(_)));
    // the rejected invoice must not have touched stock or balance
    assert!((engine.client(client_id).unwrap().balance() - 80_000.0).abs() < 1e-9);

    let invoice_id = engine
        .create_direct_invoice(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Credit,
            over,
            0.0,
            &CreditOverride::with_reason("seasonal stock-up approved"),
        )
        .unwrap();
    let invoice = engine.sales_invoice(invoice_id).unwrap();
    assert_eq!(
        invoice.credit_override_reason(),
        Some("seasonal stock-up approved")
    );
}

#[test]
fn short_stock_fails_dispatch_atomically() {
    let engine = engine();
    let client_id = register_client(&engine, 0.0);
    let (product_id, warehouse_id, _, _) = seed_stock(&engine, 5, 10.0);
    let stock_key = StockKey::new(product_id, warehouse_id);

    let so_id = engine
        .create_sales_order(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Cash,
            vec![NewSoItem {
                product_id,
                variant_id: None,
                ordered_qty: 8,
                unit_price: 20.0,
                discount: 0.0,
            }],
        )
        .unwrap();
    engine
        .confirm_sales_order(actor(), so_id, &CreditOverride::none())
        .unwrap();
    let so_item_id = engine.sales_order(so_id).unwrap().items()[0].id;
    let dn_id = engine
        .create_delivery_note(
            actor(),
            so_id,
            vec![NewDnLine {
                so_item_id,
                qty: 8,
                batch_no: None,
            }],
        )
        .unwrap();

    let err = engine.dispatch_delivery_note(actor(), dn_id).unwrap_err();
    assert!(matches!(err, DomainError::InsufficientStock(_)));
    // nothing moved: stock intact, note still PENDING, order unchanged
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 5);
    assert_eq!(
        engine.delivery_note(dn_id).unwrap().status(),
        DeliveryNoteStatus::Pending
    );
    assert_eq!(engine.sales_order(so_id).unwrap().items()[0].delivered_qty, 0);
}

#[test]
fn landed_cost_and_three_way_match_read_models() {
    let engine = engine();
    let product_id = ProductId::new();
    let warehouse_id = WarehouseId::new();
    let supplier_id = SupplierId::new();
    let po_id = engine
        .create_purchase_order(
            actor(),
            supplier_id,
            Utc::now(),
            vec![NewPoItem {
                product_id,
                variant_id: None,
                ordered_qty: 100,
                unit_cost: 10.0,
            }],
            ImportMetadata::default(),
        )
        .unwrap();
    engine.mark_po_in_transit(actor(), po_id, None).unwrap();
    engine
        .add_po_cost(
            actor(),
            po_id,
            AdditionalCost::new(CostType::Shipping, 200.0, None).unwrap(),
        )
        .unwrap();

    let po = engine.purchase_order(po_id).unwrap();
    engine
        .receive_goods(
            actor(),
            po_id,
            warehouse_id,
            Utc::now(),
            vec![NewGrnLine {
                po_item_id: po.items()[0].id,
                received_qty: 100,
                batch_no: None,
                bin_location: None,
            }],
        )
        .unwrap();

    let landed = engine.landed_cost_for_purchase_order(po_id).unwrap();
    assert!((landed.grand_total - 1_200.0).abs() < 1e-9);
    assert!((landed.lines[0].landed_unit_cost - 12.0).abs() < 1e-9);

    // supplier bills 90 of the 100 received
    let pi_id = engine
        .create_purchase_invoice(
            actor(),
            supplier_id,
            Some(po_id),
            None,
            Utc::now(),
            vec![PurchaseInvoiceItem {
                product_id,
                variant_id: None,
                qty: 90,
                unit_cost: 10.0,
            }],
            0.0,
        )
        .unwrap();
    let report = engine.match_purchase_invoice(pi_id).unwrap();
    assert_eq!(report.variance_count, 1);
    assert!(!report.rows[0].qty_match);
    assert!(report.rows[0].cost_match);
}

#[test]
fn grn_linked_invoice_matches_against_its_own_receipt() {
    let engine = engine();
    let product_id = ProductId::new();
    let warehouse_id = WarehouseId::new();
    let supplier_id = SupplierId::new();
    let po_id = engine
        .create_purchase_order(
            actor(),
            supplier_id,
            Utc::now(),
            vec![NewPoItem {
                product_id,
                variant_id: None,
                ordered_qty: 100,
                unit_cost: 10.0,
            }],
            ImportMetadata::default(),
        )
        .unwrap();
    let item_id = engine.purchase_order(po_id).unwrap().items()[0].id;
    let line = |qty| {
        vec![NewGrnLine {
            po_item_id: item_id,
            received_qty: qty,
            batch_no: None,
            bin_location: None,
        }]
    };
    let grn1 = engine
        .receive_goods(actor(), po_id, warehouse_id, Utc::now(), line(60))
        .unwrap();
    engine
        .receive_goods(actor(), po_id, warehouse_id, Utc::now(), line(40))
        .unwrap();

    // billed against the first receipt only: 60 is a clean match even
    // though the order has received 100 across both receipts
    let items = vec![PurchaseInvoiceItem {
        product_id,
        variant_id: None,
        qty: 60,
        unit_cost: 10.0,
    }];
    let pi_id = engine
        .create_purchase_invoice(
            actor(),
            supplier_id,
            None,
            Some(grn1),
            Utc::now(),
            items.clone(),
            0.0,
        )
        .unwrap();
    let report = engine.match_purchase_invoice(pi_id).unwrap();
    assert!(report.is_clean());
    assert_eq!(report.rows[0].received_qty, Some(60));
    assert_eq!(report.rows[0].ordered_qty, Some(100));

    // the same bill linked at order level sees 100 received and varies
    let pi_id = engine
        .create_purchase_invoice(actor(), supplier_id, Some(po_id), None, Utc::now(), items, 0.0)
        .unwrap();
    let report = engine.match_purchase_invoice(pi_id).unwrap();
    assert_eq!(report.variance_count, 1);

    // a receipt cannot be attached alongside a different order
    let (_, _, other_po, _) = seed_stock(&engine, 10, 1.0);
    let err = engine
        .create_purchase_invoice(
            actor(),
            supplier_id,
            Some(other_po),
            Some(grn1),
            Utc::now(),
            vec![PurchaseInvoiceItem {
                product_id,
                variant_id: None,
                qty: 1,
                unit_cost: 10.0,
            }],
            0.0,
        )
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
}

#[test]
fn standalone_delivery_note_ships_without_an_order() {
    let engine = engine();
    let client_id = register_client(&engine, 0.0);
    let (product_id, warehouse_id, _, _) = seed_stock(&engine, 30, 10.0);
    let stock_key = StockKey::new(product_id, warehouse_id);

    let dn_id = engine
        .create_standalone_delivery_note(
            actor(),
            client_id,
            warehouse_id,
            vec![NewStandaloneDnLine {
                product_id,
                variant_id: None,
                qty: 12,
                batch_no: None,
            }],
        )
        .unwrap();
    assert_eq!(engine.delivery_note(dn_id).unwrap().sales_order_id(), None);

    engine.dispatch_delivery_note(actor(), dn_id).unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 18);
    let movements = engine.movements_for(dn_id).unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Delivery);
    assert_eq!(movements[0].quantity, -12);

    // no order to bill from; the sale is invoiced directly
    let err = engine
        .invoice_delivery_note(actor(), dn_id, 0.0, &CreditOverride::none())
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));

    engine.mark_delivered(actor(), dn_id).unwrap();
    assert_eq!(
        engine.delivery_note(dn_id).unwrap().status(),
        DeliveryNoteStatus::Delivered
    );
}

#[test]
fn rollback_restores_a_prior_version_and_appends() {
    let engine = engine();
    let po_id = engine
        .create_purchase_order(
            actor(),
            SupplierId::new(),
            Utc::now(),
            vec![NewPoItem {
                product_id: ProductId::new(),
                variant_id: None,
                ordered_qty: 10,
                unit_cost: 5.0,
            }],
            ImportMetadata::default(),
        )
        .unwrap();
    engine.mark_po_in_transit(actor(), po_id, None).unwrap();
    assert_eq!(
        engine.purchase_order(po_id).unwrap().status(),
        PurchaseOrderStatus::InTransit
    );

    let entity = EntityRef::new(EntityKind::PurchaseOrder, po_id);
    let (ok, blockers) = engine.can_rollback(entity, 1).unwrap();
    assert!(ok);
    assert!(blockers.is_empty());
    // the check itself must not write history
    assert_eq!(engine.history_entries(entity).unwrap().len(), 2);

    let new_version = engine
        .rollback(actor(), entity, 1, "shipment never left port")
        .unwrap();
    assert_eq!(new_version, 3);
    assert_eq!(
        engine.purchase_order(po_id).unwrap().status(),
        PurchaseOrderStatus::Pending
    );
    let entries = engine.history_entries(entity).unwrap();
    assert_eq!(entries.len(), 3);
    assert!(entries[2]
        .change_reason
        .as_deref()
        .unwrap()
        .contains("rollback to version 1"));
}

#[test]
fn active_dependents_block_rollback() {
    let engine = engine();
    let client_id = register_client(&engine, 0.0);
    let (product_id, warehouse_id, po_id, _) = seed_stock(&engine, 50, 10.0);

    // the completed receipt blocks rolling the PO back
    let entity = EntityRef::new(EntityKind::PurchaseOrder, po_id);
    let (ok, blockers) = engine.can_rollback(entity, 1).unwrap();
    assert!(!ok);
    assert_eq!(blockers.len(), 1);
    assert_eq!(blockers[0].entity.kind, EntityKind::GoodsReceiptNote);

    let err = engine
        .rollback(actor(), entity, 1, "undo the order")
        .unwrap_err();
    assert!(matches!(err, DomainError::RollbackBlocked(_)));

    // a confirmed order with a live invoice is likewise pinned
    let so_id = engine
        .create_sales_order(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Cash,
            vec![NewSoItem {
                product_id,
                variant_id: None,
                ordered_qty: 5,
                unit_price: 25.0,
                discount: 0.0,
            }],
        )
        .unwrap();
    engine
        .confirm_sales_order(actor(), so_id, &CreditOverride::none())
        .unwrap();
    let so_item_id = engine.sales_order(so_id).unwrap().items()[0].id;
    engine
        .invoice_sales_order(actor(), so_id, &[(so_item_id, 5)], 0.0, &CreditOverride::none())
        .unwrap();

    let so_entity = EntityRef::new(EntityKind::SalesOrder, so_id);
    let (ok, blockers) = engine.can_rollback(so_entity, 1).unwrap();
    assert!(!ok);
    assert!(blockers
        .iter()
        .any(|b| b.entity.kind == EntityKind::SalesInvoice));
}

#[test]
fn credit_note_round_trip_with_return_cap() {
    let engine = engine();
    let client_id = register_client(&engine, 100_000.0);
    let (product_id, warehouse_id, _, _) = seed_stock(&engine, 100, 10.0);
    let stock_key = StockKey::new(product_id, warehouse_id);

    let invoice_id = engine
        .create_direct_invoice(
            actor(),
            client_id,
            warehouse_id,
            Utc::now(),
            PaymentType::Credit,
            vec![NewInvoiceItem {
                product_id,
                variant_id: None,
                qty: 10,
                unit_price: 100.0,
                discount: 0.0,
                batch_no: None,
            }],
            0.0,
            &CreditOverride::none(),
        )
        .unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 90);

    let invoice_item_id = engine.sales_invoice(invoice_id).unwrap().items()[0].id;
    let cn_id = engine
        .create_credit_note(
            actor(),
            invoice_id,
            vec![NewCreditLine {
                invoice_item_id,
                qty: 4,
                batch_no: None,
            }],
            "damaged in transit",
        )
        .unwrap();
    engine.apply_credit_note(actor(), cn_id).unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 94);
    // balance: 1000 charged at invoicing, 400 released by the note
    assert!((engine.client(client_id).unwrap().balance() - 600.0).abs() < 1e-9);

    // the applied note pins the invoice against voiding
    let err = engine
        .void_sales_invoice(actor(), invoice_id, "cleanup")
        .unwrap_err();
    assert!(matches!(err, DomainError::InvalidTransition(_)));

    // a second note can only return what remains
    let err = engine
        .create_credit_note(
            actor(),
            invoice_id,
            vec![NewCreditLine {
                invoice_item_id,
                qty: 7,
                batch_no: None,
            }],
            "more damage",
        )
        .unwrap_err();
    assert!(matches!(err, DomainError::OverReturn(_)));

    engine
        .void_credit_note(actor(), cn_id, "goods were fine after inspection")
        .unwrap();
    assert_eq!(engine.available_stock(&stock_key).unwrap(), 90);
    assert!((engine.client(client_id).unwrap().balance() - 1_000.0).abs() < 1e-9);
}

#[test]
fn movement_trail_references_the_causing_document() {
    let engine = engine();
    let (_, _, _, grn_id) = seed_stock(&engine, 40, 10.0);

    let movements = engine.movements_for(grn_id).unwrap();
    assert_eq!(movements.len(), 1);
    assert_eq!(movements[0].movement_type, MovementType::Receipt);
    assert_eq!(movements[0].quantity, 40);

    engine
        .cancel_goods_receipt(actor(), grn_id, "wrong warehouse")
        .unwrap();
    let movements = engine.movements_for(grn_id).unwrap();
    assert_eq!(movements.len(), 2);
    assert_eq!(movements[1].movement_type, MovementType::Adjustment);
    assert_eq!(movements[1].quantity, -40);
}
