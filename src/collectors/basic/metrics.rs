use crate::collectors::sink::MetricDesc;

/// A CloudWatch `AWS/RDS` metric and the name it is published under.
#[derive(Clone, Copy, Debug)]
pub struct Metric {
    pub cloudwatch: &'static str,
    pub name: &'static str,
    pub help: &'static str,
}

impl From<&Metric> for MetricDesc {
    fn from(metric: &Metric) -> Self {
        Self::new(metric.name, metric.help).with_source(metric.cloudwatch)
    }
}

const fn metric(cloudwatch: &'static str, name: &'static str, help: &'static str) -> Metric {
    Metric {
        cloudwatch,
        name,
        help,
    }
}

pub const METRICS: &[Metric] = &[
    metric(
        "ActiveTransactions",
        "aws_rds_active_transactions_average",
        "The average number of current transactions executing on an Aurora database instance per second.",
    ),
    metric(
        "AuroraReplicaLag",
        "aws_rds_aurora_replica_lag_average",
        "For an Aurora Replica, the amount of lag when replicating updates from the primary instance, in milliseconds.",
    ),
    metric(
        "BinLogDiskUsage",
        "aws_rds_bin_log_disk_usage_average",
        "The amount of disk space occupied by binary logs on the master. Applies to MySQL read replicas.",
    ),
    metric(
        "BufferCacheHitRatio",
        "aws_rds_buffer_cache_hit_ratio_average",
        "The percentage of requests that are served by the buffer cache.",
    ),
    metric(
        "BurstBalance",
        "aws_rds_burst_balance_average",
        "The percent of General Purpose SSD (gp2) burst-bucket I/O credits available.",
    ),
    metric(
        "CPUCreditBalance",
        "aws_rds_cpu_credit_balance_average",
        "The number of earned CPU credits that an instance has accrued since it was launched or started.",
    ),
    metric(
        "CPUCreditUsage",
        "aws_rds_cpu_credit_usage_average",
        "The number of CPU credits spent by the instance for CPU utilization.",
    ),
    metric(
        "DatabaseConnections",
        "aws_rds_database_connections_average",
        "The number of database connections in use.",
    ),
    metric(
        "Deadlocks",
        "aws_rds_deadlocks_average",
        "The average number of deadlocks in the database per second.",
    ),
    metric(
        "DiskQueueDepth",
        "aws_rds_disk_queue_depth_average",
        "The number of outstanding IOs (read/write requests) waiting to access the disk.",
    ),
    metric(
        "FreeStorageSpace",
        "aws_rds_free_storage_space_average",
        "The amount of available storage space.",
    ),
    metric(
        "NetworkReceiveThroughput",
        "aws_rds_network_receive_throughput_average",
        "The incoming (Receive) network traffic on the DB instance, including both customer database traffic and Amazon RDS traffic used for monitoring and replication.",
    ),
    metric(
        "NetworkTransmitThroughput",
        "aws_rds_network_transmit_throughput_average",
        "The outgoing (Transmit) network traffic on the DB instance, including both customer database traffic and Amazon RDS traffic used for monitoring and replication.",
    ),
    metric(
        "ReadIOPS",
        "aws_rds_read_iops_average",
        "The average number of disk I/O operations per second.",
    ),
    metric(
        "ReadLatency",
        "aws_rds_read_latency_average",
        "The average amount of time taken per disk I/O operation.",
    ),
    metric(
        "ReadThroughput",
        "aws_rds_read_throughput_average",
        "The average number of bytes read from disk per second.",
    ),
    metric(
        "ReplicaLag",
        "aws_rds_replica_lag_average",
        "The amount of time a Read Replica DB instance lags behind the source DB instance.",
    ),
    metric(
        "WriteIOPS",
        "aws_rds_write_iops_average",
        "The average number of disk I/O operations per second.",
    ),
    metric(
        "WriteLatency",
        "aws_rds_write_latency_average",
        "The average amount of time taken per disk I/O operation.",
    ),
    metric(
        "WriteThroughput",
        "aws_rds_write_throughput_average",
        "The average number of bytes written to disk per second.",
    ),
];

/// Metrics also published by the enhanced collector under the same names.
pub const OVERLAPPING_WITH_ENHANCED: &[Metric] = &[
    metric(
        "CPUUtilization",
        "node_cpu_average",
        "The percentage of CPU utilization.",
    ),
    metric(
        "FreeableMemory",
        "node_memory_mem_free_bytes",
        "The amount of available random access memory.",
    ),
    metric(
        "SwapUsage",
        "node_memory_swap_used_bytes",
        "The amount of swap space used on the DB instance.",
    ),
];
