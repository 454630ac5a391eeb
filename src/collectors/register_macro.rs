macro_rules! register_collectors {
    (
        $(
            $module:ident => $collector_type:ident
        ),* $(,)?
    ) => {
        $(
            pub mod $module;
            pub use $module::$collector_type;
        )*

        /// Closed set of collectors an HTTP request can be served from.
        #[derive(Clone)]
        pub enum CollectorType {
            $(
                $collector_type($collector_type),
            )*
        }

        $(
            impl From<$collector_type> for CollectorType {
                fn from(collector: $collector_type) -> Self {
                    CollectorType::$collector_type(collector)
                }
            }
        )*

        impl Collector for CollectorType {
            fn name(&self) -> &'static str {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.name(),
                    )*
                }
            }

            fn describe(&self) -> Vec<MetricDesc> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.describe(),
                    )*
                }
            }

            fn register_metrics(&self, registry: &Registry) -> Result<()> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.register_metrics(registry),
                    )*
                }
            }

            fn collect<'a>(&'a self, sink: &'a MetricSink) -> BoxFuture<'a, ()> {
                match self {
                    $(
                        CollectorType::$collector_type(c) => c.collect(sink),
                    )*
                }
            }
        }

        /// Names accepted by the `collect[]` filter.
        pub const COLLECTOR_NAMES: &[&'static str] = &[
            $(stringify!($module),)*
        ];
    };
}
