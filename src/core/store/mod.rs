//! Normalized store synchronization engine
//!
//! Raw exchange frames land in a [`BaseStore`] made of [`DataStore`] tables.
//! Each [`NormalizedStore`] follows one base table (or a raw-message
//! side-channel), maps rows through a [`FieldMapper`] and keeps a canonical
//! [`KeyedTable`] that consumers query, wait on or watch.
//! [`StoreWrapper`] ties one exchange's stores, subscriptions, REST seeding
//! and connections together.
pub mod base;
pub mod channel;
pub mod datastore;
pub mod initializer;
pub mod mapper;
pub mod normalized;
pub mod stream;
pub mod table;
pub mod token;
pub mod views;
pub mod wrapper;

pub use base::{BaseStore, StoreCollection};
pub use channel::{ChannelBuilder, ChannelSpec, SubscribeRequest};
pub use datastore::DataStore;
pub use initializer::{InitEndpoint, InitParams, InitRequest, StoreInitializer};
pub use mapper::{FieldMapper, FieldSource, MapContext, MessageFeed, StoreBinding, StoreSource};
pub use normalized::{NormalizedStore, StoreState};
pub use stream::{ChangeStream, ChangeWatcher, StoreChange, Waiter};
pub use table::{KeyedTable, Query, TableItem};
pub use token::{TokenPolicy, TokenRefresher};
pub use views::{PositionSummary, SortedBook};
pub use wrapper::{ExchangeProfile, StoreBindings, StoreWrapper, TOKEN_KEY};
