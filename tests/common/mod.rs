//! Catalog fixtures shared by the integration tests
//!
//! Registered in the `catalog` scope so they never mix with other mappings.

#![allow(dead_code)]

use fake::faker::company::en::CatchPhase;
use fake::faker::lorem::en::Word;
use fake::Fake;
use lifeline::mapping::{EntityTypeBuilder, EntityTypeConfiguration, QueryTypeBuilder, QueryTypeConfiguration};
use lifeline::{
    register_entity_mapping, register_query_mapping, ContextError, DataRow, Entity, FromRow,
    Projection, PropertyInfo,
};
use rust_decimal::Decimal;
use sea_query::Value;

pub const SCOPE: &str = "catalog";

#[derive(Debug, Clone, PartialEq)]
pub struct Product {
    pub id: i64,
    pub sku: String,
    pub name: String,
    pub price: Decimal,
    pub discontinued: bool,
}

impl FromRow for Product {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(Product {
            id: row.get("id")?,
            sku: row.get("sku")?,
            name: row.get("name")?,
            price: row.get("price")?,
            discontinued: row.get("discontinued")?,
        })
    }
}

impl Entity for Product {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("id", "bigint"),
            PropertyInfo::required("sku", "varchar"),
            PropertyInfo::required("name", "text"),
            PropertyInfo::required("price", "numeric"),
            PropertyInfo::required("discontinued", "boolean"),
        ]
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("sku", self.sku.clone().into()),
            ("name", self.name.clone().into()),
            ("price", self.price.into()),
            ("discontinued", self.discontinued.into()),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProductSales {
    pub sku: String,
    pub units: i64,
}

impl FromRow for ProductSales {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(ProductSales {
            sku: row.get("sku")?,
            units: row.get("units")?,
        })
    }
}

impl Projection for ProductSales {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("sku", "varchar"),
            PropertyInfo::required("units", "bigint"),
        ]
    }
}

#[derive(Default)]
pub struct ProductMapping;

impl EntityTypeConfiguration<Product> for ProductMapping {
    fn configure(&self, builder: &mut EntityTypeBuilder<Product>) {
        builder.to_table("products").has_comment("Sellable catalog items");
        builder.property("id").value_generated_on_add();
        builder.property("sku").has_max_length(32).is_unique();
        builder.property("name").has_column_name("display_name");
        builder
            .property("discontinued")
            .has_default_value("false");
        builder.has_check("ck_products_price", "price >= 0");
    }
}

/// Table name comes from the environment, as a deployment-specific setting would
pub struct AuditMapping {
    table: String,
}

impl AuditMapping {
    pub fn from_env() -> Result<Self, String> {
        let table = std::env::var("LIFELINE_AUDIT_TABLE").unwrap_or_else(|_| "product_audit".to_string());
        if table.is_empty() {
            return Err("LIFELINE_AUDIT_TABLE is empty".to_string());
        }
        Ok(AuditMapping { table })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub product_id: i64,
    pub note: String,
}

impl FromRow for AuditEntry {
    fn from_row(row: &DataRow) -> Result<Self, ContextError> {
        Ok(AuditEntry {
            id: row.get("id")?,
            product_id: row.get("product_id")?,
            note: row.get("note")?,
        })
    }
}

impl Entity for AuditEntry {
    fn properties() -> Vec<PropertyInfo> {
        vec![
            PropertyInfo::required("id", "bigint"),
            PropertyInfo::required("product_id", "bigint"),
            PropertyInfo::required("note", "text"),
        ]
    }

    fn values(&self) -> Vec<(&'static str, Value)> {
        vec![
            ("id", self.id.into()),
            ("product_id", self.product_id.into()),
            ("note", self.note.clone().into()),
        ]
    }
}

impl EntityTypeConfiguration<AuditEntry> for AuditMapping {
    fn configure(&self, builder: &mut EntityTypeBuilder<AuditEntry>) {
        builder.to_table(self.table.clone());
        builder.property("id").value_generated_on_add();
        builder.has_foreign_key(&["product_id"], "products", &["id"]);
    }
}

#[derive(Default)]
pub struct ProductSalesMapping;

impl QueryTypeConfiguration<ProductSales> for ProductSalesMapping {
    fn configure(&self, builder: &mut QueryTypeBuilder<ProductSales>) {
        builder.to_view("product_sales");
        builder.property("units").has_column_name("units_sold");
    }
}

register_entity_mapping!(ProductMapping => Product, scope = SCOPE);
register_entity_mapping!(AuditMapping => AuditEntry, scope = SCOPE, factory = AuditMapping::from_env);
register_query_mapping!(ProductSalesMapping => ProductSales, scope = SCOPE);

/// A product not yet saved, with generated data
pub fn fake_product() -> Product {
    let word: String = Word().fake();
    Product {
        id: 0,
        sku: format!("{}-{}", word.to_uppercase(), (1000..9999).fake::<u32>()),
        name: CatchPhase().fake(),
        price: Decimal::new((100..100_000).fake::<i64>(), 2),
        discontinued: false,
    }
}

/// `products` row as the database returns it
pub fn product_row(product: &Product) -> DataRow {
    DataRow::new()
        .with("id", product.id)
        .with("sku", product.sku.clone())
        .with("display_name", product.name.clone())
        .with("price", product.price)
        .with("discontinued", product.discontinued)
}
