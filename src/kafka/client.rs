use crate::config::KafkaConfig;
use crate::error::{LagError, Result};
use crate::kafka::{
    Broker, ClusterMetadata, GroupList, GroupListing, KafkaCluster, NO_COMMITTED_OFFSET, OffsetFetchScope,
    TopicPartition,
};
use rdkafka::admin::AdminClient;
use rdkafka::client::DefaultClientContext;
use rdkafka::config::{ClientConfig, RDKafkaLogLevel};
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use std::collections::{BTreeMap, HashMap};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, instrument, warn};

/// Librdkafka debug contexts enabled by the debug toggle.
const DEBUG_CONTEXTS: &str = "broker,metadata,cgrp,admin";

struct Inner {
    admin: AdminClient<DefaultClientContext>,
    consumer: BaseConsumer,
    timeout: Duration,
}

/// [`KafkaCluster`] backed by librdkafka.
///
/// All librdkafka calls block, so each one runs on the blocking pool.
#[derive(Clone)]
pub struct RdKafkaCluster {
    inner: Arc<Inner>,
    bootstrap_servers: String,
}

impl RdKafkaCluster {
    pub fn new(config: &KafkaConfig, debug: bool) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", config.broker_list().join(","));
        client_config.set("client.id", &config.client_id);

        for (key, value) in config.sasl.client_properties() {
            client_config.set(key, value);
        }

        if debug {
            client_config.set("debug", DEBUG_CONTEXTS);
            client_config.set_log_level(RDKafkaLogLevel::Debug);
        }

        for (key, value) in &config.properties {
            client_config.set(key, value);
        }

        let admin: AdminClient<DefaultClientContext> =
            client_config.create().map_err(LagError::Kafka)?;

        let consumer: BaseConsumer = client_config
            .clone()
            .set("group.id", format!("{}-internal", config.client_id))
            .set("enable.auto.commit", "false")
            .create()
            .map_err(LagError::Kafka)?;

        Ok(Self {
            inner: Arc::new(Inner {
                admin,
                consumer,
                timeout: config.request_timeout,
            }),
            bootstrap_servers: config.bootstrap_servers.clone(),
        })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> Result<T> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || f(&inner)).await?
    }
}

#[async_trait::async_trait]
impl KafkaCluster for RdKafkaCluster {
    #[instrument(skip(self), fields(bootstrap = %self.bootstrap_servers))]
    async fn fetch_metadata(&self) -> Result<ClusterMetadata> {
        self.blocking(|inner| {
            let metadata = inner
                .consumer
                .fetch_metadata(None, inner.timeout)
                .map_err(LagError::Kafka)?;

            let brokers = metadata
                .brokers()
                .iter()
                .filter_map(|b| match u16::try_from(b.port()) {
                    Ok(port) => Some(Broker::new(b.id(), b.host(), port)),
                    Err(_) => {
                        warn!(broker_id = b.id(), port = b.port(), "Ignoring broker with invalid port");
                        None
                    }
                })
                .collect();

            let mut topics = BTreeMap::new();
            let mut topic_errors = 0;
            for topic in metadata.topics() {
                if let Some(err) = topic.error() {
                    warn!(
                        topic = topic.name(),
                        error = ?RDKafkaErrorCode::from(err),
                        "Topic metadata carries an error, skipping"
                    );
                    topic_errors += 1;
                    continue;
                }
                let partitions = topic.partitions().iter().map(|p| p.id()).collect();
                topics.insert(topic.name().to_string(), partitions);
            }

            debug!(topics = topics.len(), topic_errors, "Fetched cluster metadata");
            Ok(ClusterMetadata {
                brokers,
                topics,
                topic_errors,
            })
        })
        .await
    }

    async fn check_broker(&self, broker: &Broker) -> Result<()> {
        let address = broker.address();
        match tokio::time::timeout(self.inner.timeout, TcpStream::connect(&address)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(LagError::Io(e)),
            Err(_elapsed) => Err(LagError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("connect to {address} timed out"),
            ))),
        }
    }

    async fn high_water_mark(&self, topic: &str, partition: i32) -> Result<i64> {
        let topic = topic.to_string();
        self.blocking(move |inner| {
            let (_low, high) = inner
                .consumer
                .fetch_watermarks(&topic, partition, inner.timeout)
                .map_err(LagError::Kafka)?;
            Ok(high)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn list_groups(&self) -> Result<GroupList> {
        self.blocking(|inner| list_cluster_groups(&inner.consumer, inner.timeout))
            .await
    }

    #[instrument(skip(self, broker, group, scope), fields(broker = %broker, group = %group))]
    async fn fetch_committed_offsets(
        &self,
        broker: &Broker,
        group: &str,
        scope: OffsetFetchScope<'_>,
    ) -> Result<HashMap<TopicPartition, i64>> {
        let group = group.to_string();
        let partitions = match scope {
            OffsetFetchScope::Partitions(partitions) => Some(partitions.to_vec()),
            OffsetFetchScope::AllCommitted => None,
        };

        self.blocking(move |inner| {
            list_group_offsets(&inner.admin, &group, partitions.as_deref(), inner.timeout)
        })
        .await
    }
}

unsafe fn c_str_or_empty(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        unsafe { CStr::from_ptr(ptr) }.to_string_lossy().to_string()
    }
}

/// Lists every group known to the cluster, each tagged with the broker that
/// coordinates it.
fn list_cluster_groups(consumer: &BaseConsumer, timeout: Duration) -> Result<GroupList> {
    use rdkafka::bindings::*;

    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    struct ListGuard(*const rd_kafka_group_list);
    impl Drop for ListGuard {
        fn drop(&mut self) {
            if !self.0.is_null() {
                unsafe { rd_kafka_group_list_destroy(self.0) };
            }
        }
    }

    unsafe {
        let rk = consumer.client().native_ptr();
        let mut list_ptr: *const rd_kafka_group_list = std::ptr::null();
        let err = rd_kafka_list_groups(rk, std::ptr::null(), &mut list_ptr, timeout_ms);
        let guard = ListGuard(list_ptr);

        let complete = err == rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR;
        if !complete {
            if guard.0.is_null() {
                return Err(LagError::Kafka(KafkaError::GroupListFetch(
                    RDKafkaErrorCode::from(err),
                )));
            }
            // Partial answer: some brokers did not respond in time
            warn!(error = ?RDKafkaErrorCode::from(err), "Group list is incomplete");
        }

        let list = &*guard.0;
        let count = usize::try_from(list.group_cnt).unwrap_or(0);
        let mut groups = Vec::new();

        for i in 0..count {
            let info = &*list.groups.add(i);
            let name = c_str_or_empty(info.group);
            if info.err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
                warn!(group = name, error = ?RDKafkaErrorCode::from(info.err), "Group listed with error");
                continue;
            }
            groups.push(GroupListing {
                name,
                protocol_type: c_str_or_empty(info.protocol_type),
                coordinator: info.broker.id,
            });
        }

        debug!(count = groups.len(), complete, "Listed consumer groups");
        Ok(GroupList { groups, complete })
    }
}

/// Fetch committed offsets of one group through the admin API.
/// `partitions = None` asks for every partition the group has committed.
fn list_group_offsets(
    admin: &AdminClient<DefaultClientContext>,
    group_id: &str,
    partitions: Option<&[TopicPartition]>,
    timeout: Duration,
) -> Result<HashMap<TopicPartition, i64>> {
    use rdkafka::bindings::*;

    let group_cstr = CString::new(group_id)
        .map_err(|e| LagError::Admin(format!("Invalid group id contains null byte: {e}")))?;
    let timeout_ms = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);

    // Releases every native handle on all exit paths
    struct Cleanup {
        tpl: *mut rd_kafka_topic_partition_list_t,
        request: *mut rd_kafka_ListConsumerGroupOffsets_t,
        options: *mut rd_kafka_AdminOptions_t,
        queue: *mut rd_kafka_queue_t,
        event: *mut rd_kafka_event_t,
        _topic_cstrings: Vec<CString>,
    }
    impl Drop for Cleanup {
        fn drop(&mut self) {
            unsafe {
                if !self.event.is_null() {
                    rd_kafka_event_destroy(self.event);
                }
                if !self.queue.is_null() {
                    rd_kafka_queue_destroy(self.queue);
                }
                if !self.options.is_null() {
                    rd_kafka_AdminOptions_destroy(self.options);
                }
                if !self.request.is_null() {
                    rd_kafka_ListConsumerGroupOffsets_destroy(self.request);
                }
                // The request holds a copy, so our list is freed separately
                if !self.tpl.is_null() {
                    rd_kafka_topic_partition_list_destroy(self.tpl);
                }
            }
        }
    }

    unsafe {
        let rk = admin.inner().native_ptr();

        let mut cleanup = Cleanup {
            tpl: std::ptr::null_mut(),
            request: std::ptr::null_mut(),
            options: std::ptr::null_mut(),
            queue: std::ptr::null_mut(),
            event: std::ptr::null_mut(),
            _topic_cstrings: Vec::new(),
        };

        if let Some(partitions) = partitions {
            let size = i32::try_from(partitions.len())
                .map_err(|_| LagError::Admin("Too many partitions in one request".into()))?;
            let tpl = rd_kafka_topic_partition_list_new(size);
            if tpl.is_null() {
                return Err(LagError::Admin("Failed to create topic partition list".into()));
            }
            cleanup.tpl = tpl;

            for tp in partitions {
                let topic_cstr = CString::new(tp.topic.as_str())
                    .map_err(|e| LagError::Admin(format!("Topic name contains null byte: {e}")))?;
                rd_kafka_topic_partition_list_add(tpl, topic_cstr.as_ptr(), tp.partition);
                cleanup._topic_cstrings.push(topic_cstr);
            }
        }

        let request = rd_kafka_ListConsumerGroupOffsets_new(group_cstr.as_ptr(), cleanup.tpl);
        if request.is_null() {
            return Err(LagError::Admin(
                "Failed to create ListConsumerGroupOffsets request".into(),
            ));
        }
        cleanup.request = request;

        let options = rd_kafka_AdminOptions_new(
            rk,
            rd_kafka_admin_op_t::RD_KAFKA_ADMIN_OP_LISTCONSUMERGROUPOFFSETS,
        );
        if options.is_null() {
            return Err(LagError::Admin("Failed to create AdminOptions".into()));
        }
        cleanup.options = options;

        let mut errstr_buf = [0 as c_char; 512];
        let err = rd_kafka_AdminOptions_set_request_timeout(
            options,
            timeout_ms,
            errstr_buf.as_mut_ptr(),
            errstr_buf.len(),
        );
        if err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
            let errstr = c_str_or_empty(errstr_buf.as_ptr());
            return Err(LagError::Admin(format!(
                "Failed to set request timeout: {errstr}"
            )));
        }

        let queue = rd_kafka_queue_new(rk);
        if queue.is_null() {
            return Err(LagError::Admin("Failed to create queue".into()));
        }
        cleanup.queue = queue;

        let mut request_ptr = request;
        // The admin op keeps its own copy; `cleanup` still frees the request
        rd_kafka_ListConsumerGroupOffsets(rk, &mut request_ptr, 1, options, queue);

        let event = rd_kafka_queue_poll(queue, timeout_ms);
        if event.is_null() {
            return Err(LagError::Admin("ListConsumerGroupOffsets timed out".into()));
        }
        cleanup.event = event;

        let event_type = rd_kafka_event_type(event);
        if event_type != RD_KAFKA_EVENT_LISTCONSUMERGROUPOFFSETS_RESULT {
            return Err(LagError::Admin(format!(
                "Unexpected event type: {event_type}"
            )));
        }

        let resp_err = rd_kafka_event_error(event);
        if resp_err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
            let err_msg = c_str_or_empty(rd_kafka_event_error_string(event));
            return Err(LagError::Admin(format!(
                "ListConsumerGroupOffsets failed: {err_msg}"
            )));
        }

        let result = rd_kafka_event_ListConsumerGroupOffsets_result(event);
        if result.is_null() {
            return Err(LagError::Admin(
                "ListConsumerGroupOffsets result is null".into(),
            ));
        }

        let mut n_groups: usize = 0;
        let groups_ptr = rd_kafka_ListConsumerGroupOffsets_result_groups(result, &mut n_groups);

        let mut offsets = HashMap::new();

        for i in 0..n_groups {
            let group = *groups_ptr.add(i);

            let group_error = rd_kafka_group_result_error(group);
            if !group_error.is_null() {
                let code = rd_kafka_error_code(group_error);
                if code != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
                    return Err(LagError::Admin(format!(
                        "Group {group_id} offsets unavailable: {}",
                        c_str_or_empty(rd_kafka_error_string(group_error))
                    )));
                }
            }

            let result_partitions = rd_kafka_group_result_partitions(group);
            if result_partitions.is_null() {
                continue;
            }

            let cnt = usize::try_from((*result_partitions).cnt).unwrap_or(0);
            let elems = (*result_partitions).elems;

            for j in 0..cnt {
                let elem = &*elems.add(j);
                let topic = c_str_or_empty(elem.topic);
                if elem.err != rd_kafka_resp_err_t::RD_KAFKA_RESP_ERR_NO_ERROR {
                    warn!(
                        group = group_id,
                        topic = topic,
                        partition = elem.partition,
                        error = ?RDKafkaErrorCode::from(elem.err),
                        "Partition offset carries an error, skipping"
                    );
                    continue;
                }
                // librdkafka reports a missing commit as -1001
                let offset = if elem.offset >= 0 {
                    elem.offset
                } else {
                    NO_COMMITTED_OFFSET
                };
                offsets.insert(TopicPartition::new(topic, elem.partition), offset);
            }
        }

        debug!(
            group = group_id,
            partitions = offsets.len(),
            "Fetched committed offsets"
        );
        Ok(offsets)
    }
}

impl std::fmt::Debug for RdKafkaCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RdKafkaCluster")
            .field("bootstrap_servers", &self.bootstrap_servers)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}
