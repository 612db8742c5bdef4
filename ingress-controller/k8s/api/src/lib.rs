#![deny(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod multicluster_ingress;

pub use self::multicluster_ingress::{
    derived_service_name, set_default_path_type, MultiClusterIngress, MultiClusterIngressSpec,
    PathType,
};
pub use k8s_openapi::{
    api::{
        self,
        core::v1::{
            EndpointAddress, EndpointPort, EndpointSubset, Endpoints, Secret, Service,
            ServicePort, ServiceSpec,
        },
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressTLS, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::Time,
        util::intstr::IntOrString,
    },
    ByteString,
};
pub use kube::{
    api::{ObjectMeta, ResourceExt},
    Client, Resource,
};
