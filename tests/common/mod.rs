//! Test harness: a file-backed SQLite database with the schema created
//! from the entity definitions, seeded statuses and reference data, and
//! the full service set wired against an in-memory search index.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal_macros::dec;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ConnectOptions, ConnectionTrait, Database,
    DatabaseConnection, Schema,
};
use tempfile::TempDir;

use fulfillment_api::{
    documents::SalesOrderDocument,
    entities,
    events::EventSender,
    search::{InMemorySearchIndex, SearchIndex},
    services::{
        sales_orders::{CreateSalesOrderRequest, SalesOrderLineRequest},
        AppServices,
    },
    status::StatusRegistry,
};

pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub index: Arc<InMemorySearchIndex>,
    pub services: AppServices,
    _tmp: TempDir,
}

impl TestApp {
    /// Construct a test application with fresh database state.
    pub async fn new() -> Self {
        Self::with_event_sender(None).await
    }

    pub async fn with_event_sender(event_sender: Option<EventSender>) -> Self {
        let tmp = tempfile::tempdir().expect("create temp dir");
        let db_path = tmp.path().join("fulfillment_test.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        // One connection: SQLite is the single writer in tests.
        let mut opt = ConnectOptions::new(url);
        opt.max_connections(1).min_connections(1).sqlx_logging(false);
        let db = Database::connect(opt).await.expect("connect test database");

        create_schema(&db).await;
        StatusRegistry::seed(&db).await.expect("seed order statuses");
        seed_reference_data(&db).await;

        let db = Arc::new(db);
        let index = Arc::new(InMemorySearchIndex::new());
        let dyn_index: Arc<dyn SearchIndex> = index.clone();
        let services = AppServices::build(Arc::clone(&db), dyn_index, event_sender)
            .await
            .expect("wire services");

        Self {
            db,
            index,
            services,
            _tmp: tmp,
        }
    }

    /// Rewires the services against a fresh, empty search index over the
    /// same database. Used to simulate aggregates that were never synced.
    pub async fn with_empty_index(&self) -> (AppServices, Arc<InMemorySearchIndex>) {
        let index = Arc::new(InMemorySearchIndex::new());
        let dyn_index: Arc<dyn SearchIndex> = index.clone();
        let services = AppServices::build(Arc::clone(&self.db), dyn_index, None)
            .await
            .expect("wire services");
        (services, index)
    }

    /// Creates a sales order with one detail line per entry in `qtys`,
    /// all for product 1 / uom 1 at a fixed price.
    pub async fn seed_sales_order(&self, qtys: &[i32]) -> SalesOrderDocument {
        let details = qtys
            .iter()
            .map(|qty| SalesOrderLineRequest {
                product_id: 1,
                uom_id: 1,
                qty: *qty,
                price: dec!(25.50),
                note: None,
            })
            .collect();

        self.services
            .sales_orders
            .create_sales_order(CreateSalesOrderRequest {
                agent_id: 1,
                store_id: 1,
                brand_id: Some(1),
                user_id: Some(1),
                salesman_id: Some(1),
                order_source_id: Some(1),
                order_date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
                note: None,
                details,
            })
            .await
            .expect("create sales order")
    }
}

async fn create_schema(db: &DatabaseConnection) {
    let backend = db.get_database_backend();
    let schema = Schema::new(backend);

    let statements = vec![
        schema.create_table_from_entity(entities::agent::Entity),
        schema.create_table_from_entity(entities::store::Entity),
        schema.create_table_from_entity(entities::brand::Entity),
        schema.create_table_from_entity(entities::category::Entity),
        schema.create_table_from_entity(entities::product::Entity),
        schema.create_table_from_entity(entities::uom::Entity),
        schema.create_table_from_entity(entities::warehouse::Entity),
        schema.create_table_from_entity(entities::order_source::Entity),
        schema.create_table_from_entity(entities::salesman::Entity),
        schema.create_table_from_entity(entities::user::Entity),
        schema.create_table_from_entity(entities::order_status::Entity),
        schema.create_table_from_entity(entities::sales_order::Entity),
        schema.create_table_from_entity(entities::sales_order_detail::Entity),
        schema.create_table_from_entity(entities::delivery_order::Entity),
        schema.create_table_from_entity(entities::delivery_order_detail::Entity),
        schema.create_table_from_entity(entities::sync_outbox::Entity),
        schema.create_table_from_entity(entities::document_log::Entity),
    ];

    for statement in statements {
        db.execute(backend.build(&statement))
            .await
            .expect("create table");
    }
}

async fn seed_reference_data(db: &DatabaseConnection) {
    let now = Utc::now();

    entities::agent::ActiveModel {
        id: Set(1),
        code: Set("AG-NORTH".into()),
        name: Set("North Distribution".into()),
        email: Set(None),
        phone: Set(None),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed agent");

    entities::store::ActiveModel {
        id: Set(1),
        code: Set("ST-MEGA".into()),
        name: Set("Mega Grocery".into()),
        address: Set(Some("1 Market Street".into())),
        province_id: Set(Some(31)),
        city_id: Set(Some(3101)),
        district_id: Set(Some(310101)),
        village_id: Set(None),
        created_at: Set(now),
    }
    .insert(db)
    .await
    .expect("seed store");

    entities::brand::ActiveModel {
        id: Set(1),
        code: Set("BR-AQ".into()),
        name: Set("Aquamarine".into()),
    }
    .insert(db)
    .await
    .expect("seed brand");

    entities::category::ActiveModel {
        id: Set(1),
        name: Set("Beverage".into()),
    }
    .insert(db)
    .await
    .expect("seed category");

    entities::uom::ActiveModel {
        id: Set(1),
        code: Set("CTN".into()),
        name: Set("Carton".into()),
    }
    .insert(db)
    .await
    .expect("seed uom");

    entities::product::ActiveModel {
        id: Set(1),
        code: Set("PRD-WATER".into()),
        name: Set("Sparkling Water 330ml".into()),
        brand_id: Set(Some(1)),
        category_id: Set(Some(1)),
        uom_id: Set(Some(1)),
    }
    .insert(db)
    .await
    .expect("seed product");

    entities::product::ActiveModel {
        id: Set(2),
        code: Set("PRD-TEA".into()),
        name: Set("Iced Tea 250ml".into()),
        brand_id: Set(Some(1)),
        category_id: Set(Some(1)),
        uom_id: Set(Some(1)),
    }
    .insert(db)
    .await
    .expect("seed product");

    entities::warehouse::ActiveModel {
        id: Set(1),
        code: Set("WH-01".into()),
        name: Set("Central Warehouse".into()),
    }
    .insert(db)
    .await
    .expect("seed warehouse");

    entities::order_source::ActiveModel {
        id: Set(1),
        name: Set("field_sales".into()),
    }
    .insert(db)
    .await
    .expect("seed order source");

    entities::salesman::ActiveModel {
        id: Set(1),
        code: Set("SL-07".into()),
        name: Set("Dian Prasetyo".into()),
    }
    .insert(db)
    .await
    .expect("seed salesman");

    entities::user::ActiveModel {
        id: Set(1),
        name: Set("Back Office".into()),
        email: Set("office@example.com".into()),
    }
    .insert(db)
    .await
    .expect("seed user");
}
