//! # Cart Model
//!
//! The multi-collection shopping cart.
//!
//! A cart holds one or more named collections ("first pair", "sunglasses"),
//! each an ordered list of priced line items. Collections exist because each
//! one may independently require an assembly service order.
//!
//! State is purely in-memory until finalize: abandoning a checkout session
//! has no side effects. Quantity changes are checked against the stock
//! snapshot captured when the item was added; the finalization transaction
//! re-validates against fresh inventory reads since this view may be stale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;
use uuid::Uuid;

use crate::error::{CoreError, CoreResult};
use crate::money::Money;
use crate::types::ItemCategory;
use crate::{MAX_CART_ITEMS, MAX_ITEM_QUANTITY};

// =============================================================================
// Cart Item
// =============================================================================

/// A line item inside one collection.
///
/// Price and description are frozen at add-time, so catalog edits made while
/// the checkout is open never change the amount on screen. `stock_snapshot`
/// is the quantity on hand observed when the item was added.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct CartItem {
    pub id: String,
    pub product_id: String,
    /// Description at time of adding (frozen).
    pub description: String,
    /// Unit price in centavos at time of adding (frozen).
    pub unit_price_cents: i64,
    pub quantity: i64,
    pub category: ItemCategory,
    /// Quantity on hand observed when the item was added.
    pub stock_snapshot: i64,
    #[ts(as = "String")]
    pub added_at: DateTime<Utc>,
}

impl CartItem {
    /// Creates a cart item, freezing price and description and capturing the
    /// inventory snapshot the caller just read.
    pub fn new(
        product_id: impl Into<String>,
        description: impl Into<String>,
        unit_price: Money,
        quantity: i64,
        category: ItemCategory,
        stock_snapshot: i64,
    ) -> Self {
        CartItem {
            id: Uuid::new_v4().to_string(),
            product_id: product_id.into(),
            description: description.into(),
            unit_price_cents: unit_price.cents(),
            quantity,
            category,
            stock_snapshot,
            added_at: Utc::now(),
        }
    }

    #[inline]
    pub fn unit_price(&self) -> Money {
        Money::from_cents(self.unit_price_cents)
    }

    /// Line total (unit price x quantity).
    #[inline]
    pub fn line_total(&self) -> Money {
        self.unit_price().multiply_quantity(self.quantity)
    }
}

// =============================================================================
// Collection
// =============================================================================

/// A named sub-group of cart items with its own subtotal and its own
/// assembly requirement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Collection {
    pub id: String,
    pub label: String,
    pub items: Vec<CartItem>,
}

impl Collection {
    fn new(label: impl Into<String>) -> Self {
        Collection {
            id: Uuid::new_v4().to_string(),
            label: label.into(),
            items: Vec::new(),
        }
    }

    /// Subtotal of this collection.
    pub fn subtotal(&self) -> Money {
        self.items.iter().map(CartItem::line_total).sum()
    }

    /// Whether any item category in this collection needs assembly.
    pub fn requires_assembly(&self) -> bool {
        self.items.iter().any(|i| i.category.requires_assembly())
    }

    /// Ids of the items that make the collection need assembly.
    pub fn assembly_item_ids(&self) -> Vec<String> {
        self.items
            .iter()
            .filter(|i| i.category.requires_assembly())
            .map(|i| i.id.clone())
            .collect()
    }
}

// =============================================================================
// Cart
// =============================================================================

/// The shopping cart: 1..N collections of line items.
///
/// ## Invariants
/// - Items are unique by `product_id` within a collection (adding the same
///   product again increases quantity)
/// - `sum(collection.subtotal) == cart.subtotal` at all times (subtotals are
///   derived, never stored)
/// - Quantities are positive and bounded by `MAX_ITEM_QUANTITY`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Cart {
    pub collections: Vec<Collection>,
}

impl Cart {
    pub fn new() -> Self {
        Cart {
            collections: Vec::new(),
        }
    }

    /// Adds an empty collection and returns its id.
    pub fn add_collection(&mut self, label: impl Into<String>) -> String {
        let collection = Collection::new(label);
        let id = collection.id.clone();
        self.collections.push(collection);
        id
    }

    /// Removes a collection and everything in it.
    pub fn remove_collection(&mut self, collection_id: &str) -> CoreResult<()> {
        let before = self.collections.len();
        self.collections.retain(|c| c.id != collection_id);
        if self.collections.len() == before {
            return Err(CoreError::CollectionNotFound(collection_id.to_string()));
        }
        Ok(())
    }

    /// Adds an item to a collection, merging quantity when the product is
    /// already present there.
    ///
    /// Fails with `InsufficientStock` when the resulting quantity is not
    /// backed by the item's add-time stock snapshot.
    pub fn add_item(&mut self, collection_id: &str, item: CartItem) -> CoreResult<()> {
        if self.item_count() >= MAX_CART_ITEMS {
            return Err(CoreError::CartTooLarge {
                max: MAX_CART_ITEMS,
            });
        }
        validate_quantity(item.quantity)?;

        let collection = self.collection_mut(collection_id)?;

        if let Some(existing) = collection
            .items
            .iter_mut()
            .find(|i| i.product_id == item.product_id)
        {
            let new_qty = existing.quantity + item.quantity;
            validate_quantity(new_qty)?;
            check_snapshot(&existing.product_id, existing.stock_snapshot, new_qty)?;
            existing.quantity = new_qty;
            return Ok(());
        }

        check_snapshot(&item.product_id, item.stock_snapshot, item.quantity)?;
        collection.items.push(item);
        Ok(())
    }

    /// Removes an item from a collection by item id.
    pub fn remove_item(&mut self, collection_id: &str, item_id: &str) -> CoreResult<()> {
        let collection = self.collection_mut(collection_id)?;
        let before = collection.items.len();
        collection.items.retain(|i| i.id != item_id);
        if collection.items.len() == before {
            return Err(CoreError::ItemNotFound {
                collection_id: collection_id.to_string(),
                item_id: item_id.to_string(),
            });
        }
        Ok(())
    }

    /// Sets an item's quantity. Zero removes the item.
    pub fn set_quantity(
        &mut self,
        collection_id: &str,
        item_id: &str,
        quantity: i64,
    ) -> CoreResult<()> {
        if quantity == 0 {
            return self.remove_item(collection_id, item_id);
        }
        validate_quantity(quantity)?;

        let collection = self.collection_mut(collection_id)?;
        let item = collection
            .items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| CoreError::ItemNotFound {
                collection_id: collection_id.to_string(),
                item_id: item_id.to_string(),
            })?;

        check_snapshot(&item.product_id, item.stock_snapshot, quantity)?;
        item.quantity = quantity;
        Ok(())
    }

    /// Global subtotal across all collections.
    pub fn subtotal(&self) -> Money {
        self.collections.iter().map(Collection::subtotal).sum()
    }

    /// Subtotal of one collection.
    pub fn collection_subtotal(&self, collection_id: &str) -> CoreResult<Money> {
        self.collection(collection_id).map(Collection::subtotal)
    }

    pub fn collection(&self, collection_id: &str) -> CoreResult<&Collection> {
        self.collections
            .iter()
            .find(|c| c.id == collection_id)
            .ok_or_else(|| CoreError::CollectionNotFound(collection_id.to_string()))
    }

    fn collection_mut(&mut self, collection_id: &str) -> CoreResult<&mut Collection> {
        self.collections
            .iter_mut()
            .find(|c| c.id == collection_id)
            .ok_or_else(|| CoreError::CollectionNotFound(collection_id.to_string()))
    }

    /// Number of line items across all collections.
    pub fn item_count(&self) -> usize {
        self.collections.iter().map(|c| c.items.len()).sum()
    }

    /// Total quantity of all items.
    pub fn total_quantity(&self) -> i64 {
        self.collections
            .iter()
            .flat_map(|c| c.items.iter())
            .map(|i| i.quantity)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.collections.iter().all(|c| c.items.is_empty())
    }

    pub fn clear(&mut self) {
        self.collections.clear();
    }

    /// Total quantity per product across collections, in first-seen order.
    /// The same product may appear in several collections; inventory is
    /// decremented once per product from this aggregation.
    pub fn product_quantities(&self) -> Vec<(String, i64)> {
        let mut totals: Vec<(String, i64)> = Vec::new();
        for item in self.collections.iter().flat_map(|c| c.items.iter()) {
            match totals.iter_mut().find(|(id, _)| id == &item.product_id) {
                Some((_, qty)) => *qty += item.quantity,
                None => totals.push((item.product_id.clone(), item.quantity)),
            }
        }
        totals
    }
}

fn validate_quantity(quantity: i64) -> CoreResult<()> {
    if quantity <= 0 {
        return Err(CoreError::Validation(
            crate::error::ValidationError::MustBePositive {
                field: "quantity".to_string(),
            },
        ));
    }
    if quantity > MAX_ITEM_QUANTITY {
        return Err(CoreError::QuantityTooLarge {
            requested: quantity,
            max: MAX_ITEM_QUANTITY,
        });
    }
    Ok(())
}

fn check_snapshot(product_id: &str, snapshot: i64, requested: i64) -> CoreResult<()> {
    if requested > snapshot {
        return Err(CoreError::InsufficientStock {
            product_id: product_id.to_string(),
            available: snapshot,
            requested,
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(price_cents: i64, stock: i64) -> CartItem {
        CartItem::new(
            "frame-ray",
            "Acetate frame",
            Money::from_cents(price_cents),
            1,
            ItemCategory::Frame,
            stock,
        )
    }

    fn lens(price_cents: i64, qty: i64, stock: i64) -> CartItem {
        CartItem::new(
            "lens-cr39",
            "CR-39 single vision pair",
            Money::from_cents(price_cents),
            qty,
            ItemCategory::Lens,
            stock,
        )
    }

    #[test]
    fn test_add_item_and_subtotals() {
        let mut cart = Cart::new();
        let first = cart.add_collection("first pair");
        let second = cart.add_collection("sunglasses");

        cart.add_item(&first, frame(25_000, 10)).unwrap();
        cart.add_item(&first, lens(40_000, 1, 5)).unwrap();
        cart.add_item(&second, frame(18_000, 10)).unwrap();

        assert_eq!(cart.collection_subtotal(&first).unwrap().cents(), 65_000);
        assert_eq!(cart.collection_subtotal(&second).unwrap().cents(), 18_000);
        assert_eq!(cart.subtotal().cents(), 83_000);

        // subtotal conservation across collections
        let summed: i64 = cart.collections.iter().map(|c| c.subtotal().cents()).sum();
        assert_eq!(summed, cart.subtotal().cents());
    }

    #[test]
    fn test_add_same_product_merges_quantity() {
        let mut cart = Cart::new();
        let id = cart.add_collection("first pair");

        cart.add_item(&id, lens(40_000, 1, 5)).unwrap();
        cart.add_item(&id, lens(40_000, 2, 5)).unwrap();

        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.total_quantity(), 3);
    }

    #[test]
    fn test_add_item_rejected_beyond_snapshot() {
        let mut cart = Cart::new();
        let id = cart.add_collection("first pair");

        let err = cart.add_item(&id, lens(40_000, 3, 2)).unwrap_err();
        assert!(matches!(
            err,
            CoreError::InsufficientStock {
                available: 2,
                requested: 3,
                ..
            }
        ));
        assert!(cart.is_empty());
    }

    #[test]
    fn test_set_quantity_checks_snapshot() {
        let mut cart = Cart::new();
        let id = cart.add_collection("first pair");
        cart.add_item(&id, lens(40_000, 1, 2)).unwrap();
        let item_id = cart.collections[0].items[0].id.clone();

        assert!(cart.set_quantity(&id, &item_id, 2).is_ok());
        let err = cart.set_quantity(&id, &item_id, 3).unwrap_err();
        assert!(matches!(err, CoreError::InsufficientStock { .. }));
        // failed change leaves quantity untouched
        assert_eq!(cart.collections[0].items[0].quantity, 2);
    }

    #[test]
    fn test_set_quantity_zero_removes() {
        let mut cart = Cart::new();
        let id = cart.add_collection("first pair");
        cart.add_item(&id, frame(25_000, 10)).unwrap();
        let item_id = cart.collections[0].items[0].id.clone();

        cart.set_quantity(&id, &item_id, 0).unwrap();
        assert!(cart.is_empty());
    }

    #[test]
    fn test_remove_unknown_item() {
        let mut cart = Cart::new();
        let id = cart.add_collection("first pair");
        let err = cart.remove_item(&id, "missing").unwrap_err();
        assert!(matches!(err, CoreError::ItemNotFound { .. }));
    }

    #[test]
    fn test_unknown_collection() {
        let mut cart = Cart::new();
        let err = cart.add_item("nope", frame(25_000, 10)).unwrap_err();
        assert!(matches!(err, CoreError::CollectionNotFound(_)));
    }

    #[test]
    fn test_requires_assembly_per_collection() {
        let mut cart = Cart::new();
        let with_lens = cart.add_collection("first pair");
        let accessories = cart.add_collection("extras");
        cart.add_item(&with_lens, lens(40_000, 1, 5)).unwrap();
        cart.add_item(
            &accessories,
            CartItem::new(
                "case-1",
                "Hard case",
                Money::from_cents(3_000),
                1,
                ItemCategory::Accessory,
                50,
            ),
        )
        .unwrap();

        assert!(cart.collection(&with_lens).unwrap().requires_assembly());
        assert!(!cart.collection(&accessories).unwrap().requires_assembly());
    }

    #[test]
    fn test_product_quantities_merges_across_collections() {
        let mut cart = Cart::new();
        let a = cart.add_collection("a");
        let b = cart.add_collection("b");
        cart.add_item(&a, lens(40_000, 2, 10)).unwrap();
        cart.add_item(&b, lens(40_000, 1, 10)).unwrap();

        assert_eq!(
            cart.product_quantities(),
            vec![("lens-cr39".to_string(), 3)]
        );
    }
}
