//! Unit tests for the QingCloud client.

use chrono::TimeZone;
use rstest::{fixture, rstest};

use super::*;
use crate::storage::ProviderErrorKind;
use crate::volume::VolumeType;

#[fixture]
fn config() -> FlexVolumeConfig {
    FlexVolumeConfig {
        access_key_id: String::from("QYACCESSKEYIDEXAMPLE"),
        secret_access_key: String::from("SECRETACCESSKEY"),
        zone: String::from("pek3a"),
        host: String::from("api.qingcloud.com"),
        port: 443,
        protocol: String::from("https"),
        uri: String::from("/iaas"),
        default_volume_type: None,
        job_timeout_secs: 180,
        job_poll_interval_secs: 3,
        attach_timeout_secs: 60,
        device_poll_interval_ms: 1000,
        log_filter: String::from("off"),
    }
}

#[rstest]
fn new_rejects_incomplete_config(config: FlexVolumeConfig) {
    let incomplete = FlexVolumeConfig {
        zone: String::new(),
        ..config
    };
    let err = QingCloudStorage::new(&incomplete).expect_err("zone is required");
    assert!(matches!(err, ConfigError::MissingField(_)));
}

#[rstest]
fn signed_query_carries_common_parameters_in_order(config: FlexVolumeConfig) {
    let storage = QingCloudStorage::new(&config).expect("client");
    let now = Utc
        .with_ymd_and_hms(2024, 5, 6, 7, 8, 9)
        .single()
        .expect("valid timestamp");

    let query = storage
        .signed_query(
            "DescribeVolumes",
            indexed("volumes", &[String::from("vol-1"), String::from("vol-2")]),
            now,
        )
        .expect("sign");

    let (unsigned, signature) = query.split_once("&signature=").expect("signature");
    assert_eq!(
        unsigned,
        "access_key_id=QYACCESSKEYIDEXAMPLE&action=DescribeVolumes\
         &signature_method=HmacSHA256&signature_version=1\
         &time_stamp=2024-05-06T07%3A08%3A09Z&version=1\
         &volumes.1=vol-1&volumes.2=vol-2&zone=pek3a"
    );
    let expected = signer::sign("SECRETACCESSKEY", "/iaas/", unsigned).expect("sign");
    assert_eq!(signature, signer::escape(&expected));
}

#[test]
fn large_describes_are_split_into_limited_batches() {
    let ids: Vec<String> = (1..=250).map(|n| format!("vol-{n:03}")).collect();

    let batches = describe_batches(&ids);

    assert_eq!(batches.len(), 3);
    let limits: Vec<Option<&str>> = batches
        .iter()
        .map(|params| {
            params
                .iter()
                .find(|(key, _)| key == "limit")
                .map(|(_, value)| value.as_str())
        })
        .collect();
    assert_eq!(limits, vec![Some("100"), Some("100"), Some("50")]);
    let last = batches.last().expect("third batch");
    assert!(last.contains(&(String::from("volumes.1"), String::from("vol-201"))));
    assert!(last.contains(&(String::from("volumes.50"), String::from("vol-250"))));
    let requested: usize = batches
        .iter()
        .map(|params| params.iter().filter(|(key, _)| key.starts_with("volumes.")).count())
        .sum();
    assert_eq!(requested, ids.len());
}

#[test]
fn empty_describe_needs_no_request() {
    assert!(describe_batches(&[]).is_empty());
}

#[test]
fn decode_maps_ret_code_to_provider_error() {
    let err = decode::<JobResponse>(
        "AttachVolumes",
        r#"{"ret_code":2100,"message":"resource [vol-9] not found"}"#,
    )
    .expect_err("non-zero ret_code");

    assert_eq!(err.code, Some(2100));
    assert_eq!(err.kind(), ProviderErrorKind::NotFound);
}

#[test]
fn decode_reports_malformed_bodies_as_transport_errors() {
    let err = decode::<JobResponse>("AttachVolumes", "<html>").expect_err("not json");
    assert_eq!(err.code, None);
    assert!(err.message.starts_with("AttachVolumes: malformed response"));
}

#[test]
fn describe_response_skips_ceased_volumes_and_blank_instances() {
    let response: DescribeVolumesResponse = decode(
        "DescribeVolumes",
        r#"{
            "ret_code": 0,
            "total_count": 3,
            "volume_set": [
                {"volume_id": "vol-1", "volume_name": "data", "size": 20, "volume_type": 2,
                 "status": "in-use", "instance": {"instance_id": "i-1", "device": "/dev/sdc"}},
                {"volume_id": "vol-2", "size": 10, "volume_type": 0, "status": "available",
                 "instance": {"instance_id": "", "device": ""}},
                {"volume_id": "vol-3", "size": 10, "status": "ceased"}
            ]
        }"#,
    )
    .expect("decode");

    let volumes: Vec<Volume> = response
        .volume_set
        .into_iter()
        .filter(|item| !item.is_gone())
        .map(types::VolumeItem::into_volume)
        .collect();

    assert_eq!(volumes.len(), 2);
    let first = volumes.first().expect("vol-1");
    assert!(first.is_attached_to(&InstanceId::from("i-1")));
    assert_eq!(first.device(), Some("/dev/sdc"));
    assert_eq!(first.volume_type, Some(VolumeType::HighCapacity));
    let second = volumes.get(1).expect("vol-2");
    assert_eq!(second.attachment, None);
}

#[rstest]
#[case("pending", JobStatus::Pending)]
#[case("working", JobStatus::Pending)]
#[case("successful", JobStatus::Successful)]
#[case("failed", JobStatus::Failed(String::from("failed")))]
#[case("done with failure", JobStatus::Failed(String::from("done with failure")))]
fn job_statuses_map_to_terminal_states(#[case] raw: &str, #[case] expected: JobStatus) {
    assert_eq!(job_status(raw), expected);
}
